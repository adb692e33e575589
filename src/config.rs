//! Runner timing configuration
//!
//! Every delay and bound the runner uses lives here. Values are plain
//! milliseconds so a JSON file stays readable; accessors hand out
//! [`Duration`]s.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Timing knobs for the command bridge, interpreter and scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Pause before every transport request.
    pub settle_delay_ms: u64,
    /// Bound on each connect, discovery, read and write.
    pub operation_timeout_ms: u64,
    /// How long a scan collects advertisements.
    pub scan_window_ms: u64,
    /// Wait before reconnecting right after a disconnect.
    pub reconnect_settle_ms: u64,
    /// Wait between sessions when the previous one left no open link.
    pub session_settle_ms: u64,
    /// Reads attempted by poll-until-valid before giving up.
    pub poll_attempts: u32,
    /// Pause between poll-until-valid reads.
    pub poll_interval_ms: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 20,
            operation_timeout_ms: 20_000,
            scan_window_ms: 5_000,
            reconnect_settle_ms: 1_000,
            session_settle_ms: 1_000,
            poll_attempts: 5,
            poll_interval_ms: 2_000,
        }
    }
}

impl ValidatorConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "poll_attempts must be at least 1".to_string(),
            ));
        }
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "operation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    pub fn session_settle(&self) -> Duration {
        Duration::from_millis(self.session_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
