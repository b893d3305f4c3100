//! Engine Configuration
//!
//! Loaded from TOML. Every field is optional and falls back to its default.
//!
//! # Example Config File
//!
//! ```toml
//! app_name = "courtyard"
//! frames = 600
//!
//! [threading]
//! dual_thread = true
//!
//! [render]
//! depth_prepass = true
//!
//! [render.shadows]
//! default_resolution = 2048
//! cascade_count = 4
//! soft_shadow_mode = "pcf"
//!
//! [render.atlas]
//! size = 8192
//! ```

use std::path::Path;

use log::info;
use penumbra_render::RenderConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Update/render thread layout
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// Run scene updates on their own thread, in lockstep with rendering
    pub dual_thread: bool,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self { dual_thread: true }
    }
}

/// Complete engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app_name: String,
    /// Frames the demo loop renders before shutting down
    pub frames: u64,
    pub threading: ThreadingConfig,
    pub render: RenderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "penumbra".to_string(),
            frames: 120,
            threading: ThreadingConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Clamp render values into range, reject what cannot be clamped
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.frames == 0 {
            return Err(ConfigError::Invalid("frames must be at least 1".to_string()));
        }
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name must not be empty".to_string()));
        }
        self.render.validate();
        Ok(())
    }
}
