//! Application settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! file (toml, yaml or json, by extension), then `DRIVETHRU__*` environment
//! variables, e.g. `DRIVETHRU__SERVER__PORT=8080`.

use drivethru_core::{LoggingConfig, RelayConfig, ServerConfig};
use drivethru_eye::config::{CameraSpec, VisionConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const ENV_PREFIX: &str = "DRIVETHRU";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub relay: RelayConfig,
    pub vision: VisionConfig,
    /// Cameras registered at startup; the first one that opens becomes active
    pub cameras: Vec<CameraSpec>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.relay.validate()?;
        self.vision.validate()?;

        let mut names = HashSet::new();
        for camera in &self.cameras {
            camera.validate()?;
            if !names.insert(camera.name.as_str()) {
                return Err(format!("duplicate camera name '{}'", camera.name));
            }
        }
        Ok(())
    }

    /// Cameras whose name matches no station; their presence events go nowhere
    pub fn unmatched_cameras(&self) -> Vec<&str> {
        self.cameras
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !self.relay.stations.iter().any(|s| s == name))
            .collect()
    }
}
