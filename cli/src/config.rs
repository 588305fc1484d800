// Configuration management for the Wave CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/wave/config.json
// - Linux: ~/.config/wave/config.json
// - Windows: %APPDATA%\wave\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wave_core::{WaveConfig, WaveEnvironment};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings shared with the core library
    #[serde(flatten)]
    pub wave: WaveConfig,

    /// Devices started by `wave simulate` when --devices is omitted
    pub simulate_devices: usize,

    /// Directory for rolling log files; logs go to stderr when unset
    pub log_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wave: WaveConfig::default(),
            simulate_devices: 3,
            log_dir: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("wave");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("wave");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Where persisted preferences live
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.wave.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("preferences")),
        }
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.wave.validate().context("Invalid configuration")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.wave.validate().context("Refusing to save invalid configuration")?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. The caller saves.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "environment" => {
                self.wave.environment = match value {
                    "production" => WaveEnvironment::Production,
                    "development" => WaveEnvironment::Development,
                    _ => anyhow::bail!("Environment must be 'production' or 'development'"),
                };
            }
            "handshake_timeout_secs" => {
                self.wave.handshake_timeout_secs = value.parse().context("Invalid number")?;
            }
            "storage_path" => {
                self.wave.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "simulate_devices" => {
                let devices: usize = value.parse().context("Invalid number")?;
                if devices == 0 {
                    anyhow::bail!("simulate_devices must be at least 1");
                }
                self.simulate_devices = devices;
            }
            "log_dir" => {
                self.log_dir = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.wave.validate().context("Invalid value")?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "environment" => Some(environment_name(self.wave.environment).to_string()),
            "service_uuid" => Some(self.wave.service_id().to_string()),
            "handshake_timeout_secs" => Some(self.wave.handshake_timeout_secs.to_string()),
            "storage_path" => self.wave.storage_path.clone(),
            "simulate_devices" => Some(self.simulate_devices.to_string()),
            "log_dir" => self.log_dir.clone(),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "environment".to_string(),
                environment_name(self.wave.environment).to_string(),
            ),
            ("service_uuid".to_string(), self.wave.service_id().to_string()),
            (
                "handshake_timeout_secs".to_string(),
                format!("{}s", self.wave.handshake_timeout_secs),
            ),
            (
                "storage_path".to_string(),
                self.wave
                    .storage_path
                    .clone()
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("simulate_devices".to_string(), self.simulate_devices.to_string()),
            (
                "log_dir".to_string(),
                self.log_dir.clone().unwrap_or_else(|| "(stderr)".to_string()),
            ),
        ]
    }
}

fn environment_name(environment: WaveEnvironment) -> &'static str {
    match environment {
        WaveEnvironment::Production => "production",
        WaveEnvironment::Development => "development",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.simulate_devices, 3);
        assert_eq!(config.wave.handshake_timeout_secs, 10);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_flattened_serialization() {
        let mut config = Config::default();
        config.set("environment", "production").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"environment\":\"production\""));

        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.wave.environment, WaveEnvironment::Production);
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("handshake_timeout_secs", "25").unwrap();
        config.set("storage_path", "/tmp/wave").unwrap();
        assert_eq!(config.get("handshake_timeout_secs").as_deref(), Some("25"));
        assert_eq!(config.get("storage_path").as_deref(), Some("/tmp/wave"));

        config.set("storage_path", "").unwrap();
        assert!(config.get("storage_path").is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        assert!(config.set("environment", "staging").is_err());
        assert!(config.set("handshake_timeout_secs", "0").is_err());
        assert!(config.set("simulate_devices", "0").is_err());
        assert!(config.set("no_such_key", "1").is_err());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.simulate_devices, 3);

        let mut changed = config.clone();
        changed.set("simulate_devices", "5").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().simulate_devices, 5);
    }
}
