//! Application configuration
//!
//! TOML file describing the station identity and the central system
//! endpoint. Everything else lives in the device model and is changed at
//! runtime via `ChangeConfiguration`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Charge point identity, also the WebSocket path element.
    pub id: String,
    pub model: String,
    pub vendor: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub number_of_connectors: i32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            id: "CP001".to_string(),
            model: "Wallbox One".to_string(),
            vendor: "OpenCharge".to_string(),
            serial_number: None,
            firmware_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            number_of_connectors: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CentralSystemConfig {
    /// Base WebSocket URL of the central system (without the station id).
    pub url: String,
    /// Security profile 0-3.
    pub security_profile: i32,
    pub authorization_key: Option<String>,
}

impl Default for CentralSystemConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000/ocpp".to_string(),
            security_profile: 0,
            authorization_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// SQLite file path.
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: "./chargepoint.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub station: StationConfig,
    pub central_system: CentralSystemConfig,
    pub database: DatabaseSection,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(toml::from_str(&text)?)
    }
}

/// `~/.config/ocpp-chargepoint/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-chargepoint")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml() {
        let text = r#"
[station]
id = "CP042"
number_of_connectors = 4

[central_system]
url = "wss://csms.example/ocpp"
security_profile = 2
authorization_key = "0011223344556677"
"#;
        let config: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(config.station.id, "CP042");
        assert_eq!(config.station.number_of_connectors, 4);
        // unspecified sections fall back to defaults
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.central_system.security_profile, 2);
    }

    #[test]
    fn defaults_are_complete() {
        let config = AppConfig::default();
        assert!(!config.station.id.is_empty());
        assert!(config.central_system.url.starts_with("ws"));
    }
}
