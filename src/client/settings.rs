use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// where the consumer finds the bridge, and how patiently it talks to it
///
/// persisted as camelCase json so a settings dialog can edit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    /// push attempts before falling back to polling
    pub push_attempts: u32,
    pub attempt_timeout_ms: u64,
    /// pause between push attempts
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ws_port: 3001,
            http_port: 3002,
            push_attempts: 3,
            attempt_timeout_ms: 2000,
            retry_delay_ms: 1000,
            poll_interval_ms: 2000,
            request_timeout_ms: 1500,
        }
    }
}

impl ClientSettings {
    pub fn push_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.ws_port)
    }

    pub fn poll_url(&self) -> String {
        format!("http://{}:{}/weight", self.host, self.http_port)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.ws_port == 0 || self.http_port == 0 {
            return Err(Error::Config("ports must be non-zero".into()));
        }
        if self.push_attempts == 0 {
            return Err(Error::Config("pushAttempts must be at least 1".into()));
        }
        let timings = [
            ("attemptTimeoutMs", self.attempt_timeout_ms),
            ("pollIntervalMs", self.poll_interval_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
        ];
        if let Some((key, _)) = timings.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::Config(format!("{} must be positive", key)));
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let settings: ClientSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// a missing or broken file falls back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("[CLIENT] Could not read settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_host_and_ports() {
        let settings = ClientSettings {
            host: "10.0.0.2".into(),
            ws_port: 4001,
            http_port: 4002,
            ..ClientSettings::default()
        };
        assert_eq!(settings.push_url(), "ws://10.0.0.2:4001");
        assert_eq!(settings.poll_url(), "http://10.0.0.2:4002/weight");
    }

    #[test]
    fn reads_legacy_three_field_json() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{"host":"192.168.0.9","wsPort":3001,"httpPort":3002}"#).unwrap();
        assert_eq!(settings.host, "192.168.0.9");
        assert_eq!(settings.push_attempts, 3);
        assert_eq!(settings.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn save_then_load_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scale.json");
        let settings = ClientSettings { host: "scale.lan".into(), ..ClientSettings::default() };

        settings.save(&path).unwrap();
        assert_eq!(ClientSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scale.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(ClientSettings::load_or_default(&path), ClientSettings::default());
    }

    #[test]
    fn rejects_zero_attempts() {
        let settings = ClientSettings { push_attempts: 0, ..ClientSettings::default() };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
        assert!(settings.save(std::env::temp_dir().join("never-written.json")).is_err());
    }

    #[test]
    fn rejects_zero_timings() {
        for settings in [
            ClientSettings { poll_interval_ms: 0, ..ClientSettings::default() },
            ClientSettings { attempt_timeout_ms: 0, ..ClientSettings::default() },
            ClientSettings { request_timeout_ms: 0, ..ClientSettings::default() },
        ] {
            assert!(matches!(settings.validate(), Err(Error::Config(_))));
        }
    }
}
