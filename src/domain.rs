use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// last known weight from the scale
///
/// immutable once built; the store swaps whole readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightReading {
    /// kilograms, may be fractional
    pub value: f64,
    /// when the bridge decoded it
    pub captured_at: DateTime<Utc>,
}

impl WeightReading {
    pub fn new(value: f64, captured_at: DateTime<Utc>) -> Self {
        Self { value, captured_at }
    }

    pub fn now(value: f64) -> Self {
        Self::new(value, Utc::now())
    }

    /// the reading a fresh store starts with: 0 kg at the unix epoch
    pub fn zero() -> Self {
        Self::new(0.0, DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Default for WeightReading {
    fn default() -> Self {
        Self::zero()
    }
}

/// device link state on the bridge side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

// ==============================================================================
// wire payloads
// ==============================================================================

/// push transport message: `{"weight": 70}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightMessage {
    #[serde(serialize_with = "serialize_weight")]
    pub weight: f64,
}

impl From<WeightReading> for WeightMessage {
    fn from(reading: WeightReading) -> Self {
        Self { weight: reading.value }
    }
}

/// poll transport response: `{"weight": 70, "lastUpdate": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    #[serde(serialize_with = "serialize_weight")]
    pub weight: f64,
    pub last_update: DateTime<Utc>,
}

impl From<WeightReading> for PollResponse {
    fn from(reading: WeightReading) -> Self {
        Self {
            weight: reading.value,
            last_update: reading.captured_at,
        }
    }
}

/// legacy probe response: `{"peso": 70, "raw": "...", "error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    #[serde(serialize_with = "serialize_weight")]
    pub peso: f64,
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// integral weights go out as json integers so browsers see `70`, not `70.0`
fn serialize_weight<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}
