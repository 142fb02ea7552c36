//! ==============================================================================
//! config.rs - Bridge Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `bridge.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     environment overrides so a deployment can move the scale or the ports
//!     without editing files.
//!
//! structure:
//!     - DeviceConfig: where the scale lives and how hard to retry.
//!     - ServerConfig: bind address and the websocket / http ports.
//!     - ProbeConfig: candidate endpoints for the legacy /peso probe.
//!     - LoggingConfig: log level and per-reading logging.
//!
//! environment overrides:
//!     BRIDGE_CONFIG    path of the toml file to load first
//!     SCALE_HOST       device host
//!     SCALE_TCP_PORT   device port
//!     WEBSOCKET_PORT   push listener port
//!     HTTP_PORT        poll listener port
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub device: DeviceConfig,
    pub server: ServerConfig,
    pub probe: ProbeConfig,
    pub logging: LoggingConfig,
    /// file this config came from, `None` for built-in defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
    /// problems met while locating the file, reported by `print_summary`
    /// (logging is not up yet while the config loads)
    #[serde(skip)]
    pub load_warnings: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    /// fixed delay before reconnecting after a drop or failed attempt
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// silence on an open socket longer than this counts as a dead link; 0 disables
    pub idle_timeout_ms: u64,
}

impl DeviceConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.18.8".to_string(),
            port: 8080,
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 5000,
            idle_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub ws_port: u16,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            ws_port: 3001,
            http_port: 3002,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}/peso", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConfig {
    pub candidates: Vec<ProbeTarget>,
    pub timeout_ms: u64,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            candidates: vec![ProbeTarget::new("192.168.18.8", 3000)],
            timeout_ms: 1200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// log every decoded reading at info instead of debug
    pub show_weight_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_weight_data: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback, then apply environment overrides
    pub fn load_or_default() -> Self {
        let mut paths: Vec<PathBuf> = Vec::new();
        if let Ok(explicit) = std::env::var("BRIDGE_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("bridge.toml"));
        paths.push(PathBuf::from("..").join("config").join("bridge.toml"));

        let mut warnings = Vec::new();
        let mut config = None;
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(mut loaded) => {
                        loaded.source = Some(path.clone());
                        config = Some(loaded);
                        break;
                    }
                    Err(e) => warnings.push(format!("Failed to load {}: {}", path.display(), e)),
                }
            }
        }

        let mut config = config.unwrap_or_else(|| {
            warnings.push("No config file found - using defaults".to_string());
            Self::default()
        });
        config.load_warnings.extend(warnings);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// overlay values from the environment; unparsable ports are ignored
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SCALE_HOST").filter(|h| !h.trim().is_empty()) {
            self.device.host = host.trim().to_string();
        }
        let rejected = [
            override_port(&lookup, "SCALE_TCP_PORT", &mut self.device.port),
            override_port(&lookup, "WEBSOCKET_PORT", &mut self.server.ws_port),
            override_port(&lookup, "HTTP_PORT", &mut self.server.http_port),
        ];
        self.load_warnings.extend(rejected.into_iter().flatten());
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(Error::Config("device.host must not be empty".into()));
        }
        let timings = [
            ("device.reconnect_delay_ms", self.device.reconnect_delay_ms),
            ("device.connect_timeout_ms", self.device.connect_timeout_ms),
            ("probe.timeout_ms", self.probe.timeout_ms),
        ];
        if let Some((key, _)) = timings.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::Config(format!("{} must be positive", key)));
        }
        if self.server.ws_port != 0 && self.server.ws_port == self.server.http_port {
            return Err(Error::Config(format!(
                "server.ws_port and server.http_port are both {}",
                self.server.ws_port
            )));
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        for warning in &self.load_warnings {
            tracing::warn!("[CONFIG] {}", warning);
        }
        match &self.source {
            Some(path) => tracing::info!("[CONFIG] Loaded from {}", path.display()),
            None => tracing::info!("[CONFIG] Using built-in defaults"),
        }
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│          BRIDGE CONFIGURATION           │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Scale: {}", self.device.address());
        tracing::info!("│ Reconnect Delay: {}ms", self.device.reconnect_delay_ms);
        match self.device.idle_timeout() {
            Some(idle) => tracing::info!("│ Idle Timeout: {:?}", idle),
            None => tracing::info!("│ Idle Timeout: disabled"),
        }
        tracing::info!("│ WebSocket: {}:{}", self.server.bind_address, self.server.ws_port);
        tracing::info!("│ HTTP: {}:{}", self.server.bind_address, self.server.http_port);
        tracing::info!("│ Log Level: {}", self.logging.level);
        tracing::info!("└─────────────────────────────────────────┘");
    }
}

/// returns a warning when the variable is set but not a port
fn override_port<F>(lookup: &F, key: &str, target: &mut u16) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u16>() {
        Ok(port) => {
            *target = port;
            None
        }
        Err(_) => Some(format!("Ignoring {}={:?}: not a port", key, raw)),
    }
}
