// Shared configuration sections

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("server host must not be empty".to_string());
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `drivethru_eye=debug,info`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Station ring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Station names in the order vehicles visit them
    pub stations: Vec<String>,
    /// Station where vehicles are injected; defaults to the first one
    pub entry: Option<String>,
    /// Vehicles waiting at the entry station at startup
    pub seed_vehicles: u64,
    /// Capacity of the live audit broadcast channel
    pub audit_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stations: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            entry: None,
            seed_vehicles: 10,
            audit_buffer: 256,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.stations.is_empty() {
            return Err("at least one station is required".to_string());
        }

        let mut seen = HashSet::new();
        for name in &self.stations {
            if name.trim().is_empty() {
                return Err("station names must not be empty".to_string());
            }
            if !seen.insert(name.as_str()) {
                return Err(format!("duplicate station name '{}'", name));
            }
        }

        if let Some(entry) = &self.entry {
            if !seen.contains(entry.as_str()) {
                return Err(format!("entry station '{}' is not in the station list", entry));
            }
        }

        if self.audit_buffer == 0 {
            return Err("audit_buffer must be at least 1".to_string());
        }

        Ok(())
    }

    /// Index of the entry station within `stations`
    pub fn entry_index(&self) -> usize {
        self.entry
            .as_ref()
            .and_then(|entry| self.stations.iter().position(|s| s == entry))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.entry_index(), 0);
        assert_eq!(config.seed_vehicles, 10);
    }

    #[test]
    fn test_relay_config_rejects_empty() {
        let config = RelayConfig {
            stations: vec![],
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_config_rejects_duplicates() {
        let config = RelayConfig {
            stations: vec!["MENU".into(), "PAY".into(), "MENU".into()],
            ..RelayConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("MENU"));
    }

    #[test]
    fn test_relay_config_entry_lookup() {
        let mut config = RelayConfig {
            stations: vec!["MENU".into(), "PAY".into(), "PICKUP".into()],
            entry: Some("PAY".into()),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.entry_index(), 1);

        config.entry = Some("DRIVE".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_config_bind_address() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let relay: RelayConfig = serde_json::from_str(r#"{"stations": ["A", "B"]}"#).unwrap();
        assert_eq!(relay.stations, vec!["A", "B"]);
        assert_eq!(relay.seed_vehicles, 10);

        let logging: LoggingConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert!(logging.json);
        assert_eq!(logging.level, "info");
    }
}
