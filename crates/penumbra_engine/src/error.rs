//! Engine error types

use penumbra_render::RenderError;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Failed to spawn scene update thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("Scene update panicked: {0}")]
    UpdatePanicked(String),

    #[error("Frame render panicked: {0}")]
    RenderPanicked(String),

    #[error("Engine context not initialized")]
    NotInitialized,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
