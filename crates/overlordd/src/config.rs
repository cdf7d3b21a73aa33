//! Daemon configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Values are layered: defaults, TOML file,
//! environment, then command-line flags applied by the binary.
//!
//! ```toml
//! socket_path = "/run/overlord.sock"
//!
//! [heartbeat]
//! period_ms = 3000
//! timeout_ms = 5000
//!
//! [log]
//! filter = "overlordd=debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use overlord_core::HEARTBEAT_INFO;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/overlord.sock";

/// Environment variable overriding the socket path
pub const SOCKET_ENV: &str = "OVERLORD_SOCKET";

/// Environment variable overriding the log filter
pub const LOG_FILTER_ENV: &str = "OVERLORD_LOG";

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlordConfig {
    /// Unix socket the push-channel server listens on
    pub socket_path: PathBuf,
    pub heartbeat: HeartbeatConfig,
    pub delivery: DeliveryConfig,
    pub log: LogConfig,
}

/// Outbound emission and inbound liveness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Emit periodic heartbeats to subscribers
    pub enabled: bool,
    /// Emission period
    pub period_ms: u64,
    /// A peer is overdue once this long passes without a report
    pub timeout_ms: u64,
    /// How often peers are checked against the timeout
    pub check_interval_ms: u64,
    /// Informational tag carried by each heartbeat
    pub info: String,
    /// Broadcast an alert when a peer becomes overdue
    pub alert_on_missing: bool,
}

/// Per-subscriber delivery limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Upper bound on a single subscriber write
    pub write_timeout_ms: u64,
    /// Idle connections are closed after this long without a message
    pub read_timeout_secs: u64,
    /// Largest accepted inbound line
    pub max_message_size: usize,
}

/// Logging sink settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directives
    pub filter: String,
    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for OverlordConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            heartbeat: HeartbeatConfig::default(),
            delivery: DeliveryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 3000,
            timeout_ms: 5000,
            check_interval_ms: 1000,
            info: HEARTBEAT_INFO.to_string(),
            alert_on_missing: true,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 1000,
            read_timeout_secs: 300,
            max_message_size: 1_048_576,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "overlordd=info,overlord=info".to_string(),
            file: None,
        }
    }
}

impl HeartbeatConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl DeliveryConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl OverlordConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// `$XDG_CONFIG_HOME/overlord/overlord.toml`, if a config dir is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("overlord").join("overlord.toml"))
    }

    /// Loads `path` if given, otherwise the default path if it exists,
    /// otherwise the built-in defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket) = lookup(SOCKET_ENV).filter(|s| !s.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|s| !s.is_empty()) {
            self.log.filter = filter;
        }
    }

    /// Rejects values the timers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("heartbeat.period_ms", self.heartbeat.period_ms),
            ("heartbeat.timeout_ms", self.heartbeat.timeout_ms),
            ("heartbeat.check_interval_ms", self.heartbeat.check_interval_ms),
            ("delivery.write_timeout_ms", self.delivery.write_timeout_ms),
            ("delivery.read_timeout_secs", self.delivery.read_timeout_secs),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.delivery.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "delivery.max_message_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "socket_path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OverlordConfig::default();
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.heartbeat.period(), Duration::from_millis(3000));
        assert_eq!(config.heartbeat.info, "periodic_ws_send");
        assert!(config.heartbeat.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = OverlordConfig::from_toml_str(
            r#"
            socket_path = "/run/overlord.sock"

            [heartbeat]
            timeout_ms = 8000
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/overlord.sock"));
        assert_eq!(config.heartbeat.timeout_ms, 8000);
        assert_eq!(config.heartbeat.period_ms, 3000);
        assert_eq!(config.delivery, DeliveryConfig::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = OverlordConfig::from_toml_str("").unwrap();
        assert_eq!(config, OverlordConfig::default());
    }

    #[test]
    fn test_parse_error() {
        let err = OverlordConfig::from_toml_str("heartbeat = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[log]\nfilter = \"overlordd=debug\"").unwrap();

        let config = OverlordConfig::load(file.path()).unwrap();
        assert_eq!(config.log.filter, "overlordd=debug");
    }

    #[test]
    fn test_load_missing_file() {
        let err = OverlordConfig::load(Path::new("/nonexistent/overlord.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/overlord.toml"));
    }

    #[test]
    fn test_overrides() {
        let mut config = OverlordConfig::default();
        config.apply_overrides(|key| match key {
            SOCKET_ENV => Some("/tmp/other.sock".to_string()),
            LOG_FILTER_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.log.filter, LogConfig::default().filter);
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let mut config = OverlordConfig::default();
        config.heartbeat.period_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat.period_ms"));
    }
}
