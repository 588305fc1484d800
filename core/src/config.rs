//! Wave configuration
//!
//! Serializable to/from JSON and validated on every load and save.

use crate::radio::ServiceId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the per-handshake timeout
const MAX_HANDSHAKE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Which service UUID the build advertises and scans for.
///
/// Development and production devices never see each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveEnvironment {
    Production,
    Development,
}

impl WaveEnvironment {
    pub fn service_id(&self) -> ServiceId {
        match self {
            WaveEnvironment::Production => ServiceId::PRODUCTION,
            WaveEnvironment::Development => ServiceId::DEVELOPMENT,
        }
    }
}

impl Default for WaveEnvironment {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            WaveEnvironment::Development
        } else {
            WaveEnvironment::Production
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub environment: WaveEnvironment,

    /// Upper bound for one connect → read → disconnect handshake
    pub handshake_timeout_secs: u64,

    /// Storage path for persisted preferences (in-memory when unset)
    pub storage_path: Option<String>,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            environment: WaveEnvironment::default(),
            handshake_timeout_secs: 10,
            storage_path: None,
        }
    }
}

impl WaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_id(&self) -> ServiceId {
        self.environment.service_id()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.handshake_timeout_secs > MAX_HANDSHAKE_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "handshake_timeout_secs cannot exceed {}",
                MAX_HANDSHAKE_TIMEOUT_SECS
            )));
        }

        if matches!(self.storage_path.as_deref(), Some("")) {
            return Err(ConfigError::Invalid(
                "storage_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = self.to_json_string()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_string(json: &str) -> Result<Self, ConfigError> {
        let config: WaveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
