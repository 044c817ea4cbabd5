//! Application settings

use super::ConfigError;
use crate::core::bridge::BridgeConfig;
use crate::core::logger::LogFormat;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link settings
    pub serial: SerialConfig,
    /// Bridge behaviour
    pub bridge: BridgeConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from `path`, or from the default location
    ///
    /// An explicit path must exist. A missing file at the default location
    /// yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match super::config_file() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.is_empty() && !self.bridge.dry_run {
            return Err(ConfigError::Invalid("serial.port is empty".to_string()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be positive".to_string()));
        }
        if self.bridge.command_prefix.is_empty() || self.bridge.reading_prefix.is_empty() {
            return Err(ConfigError::Invalid("topic prefixes must not be empty".to_string()));
        }
        if self.bridge.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "bridge.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.bridge.max_frame_len == 0 || self.bridge.max_frame_len > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "bridge.max_frame_len must be in 1..={}",
                u16::MAX
            )));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Emit JSON instead of human-readable lines
    pub json: bool,
    /// Directory for daily rolling log files
    pub directory: Option<PathBuf>,
    /// Frame traffic log file
    pub traffic_log: Option<PathBuf>,
    /// Traffic log format
    pub traffic_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
            traffic_log: None,
            traffic_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.bridge.command_prefix, "vrc/pcc");
        assert_eq!(config.bridge.reading_prefix, "vrc/thermal");
        assert_eq!(config.bridge.reset_grace_ms, 5000);
        assert!(config.bridge.verify_checksum);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyUSB1"

            [bridge]
            thermal_request_interval_ms = 200

            [logging]
            traffic_format = "jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.bridge.thermal_request_interval_ms, Some(200));
        assert_eq!(config.bridge.poll_interval_ms, 10);
        assert_eq!(config.logging.traffic_format, LogFormat::Jsonl);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.bridge.dry_run = true;
        config.logging.level = "debug".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bridge]\nmax_frame_len = 0\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, "[serial]\nbaud_rate = \"fast\"\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(ConfigError::Parse(_))));
    }
}
