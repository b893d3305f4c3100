//! Render error types

use thiserror::Error;

use crate::id::{DrawableId, LightId, ProbeId};
use crate::light::LightType;

/// Errors raised by explicit calls into the light and shadow subsystem.
///
/// Steady-state frame execution never returns these; it degrades and logs.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Shadow atlas exhausted: light {light:?} needs {regions} region(s) of {size}px")]
    AtlasExhausted {
        light: LightId,
        size: u32,
        regions: u32,
    },

    #[error("Invalid shadow allocation size: {0}")]
    InvalidAllocationSize(u32),

    #[error("Unknown light: {0:?}")]
    UnknownLight(LightId),

    #[error("Unknown drawable: {0:?}")]
    UnknownDrawable(DrawableId),

    #[error("Unknown probe: {0:?}")]
    UnknownProbe(ProbeId),

    #[error("Light {light:?} cannot change type from {from:?} to {to:?}")]
    LightTypeChange {
        light: LightId,
        from: LightType,
        to: LightType,
    },

    #[error("Shadow target creation failed: {0}")]
    TargetCreation(String),

    #[error("Buffer '{0}' has been released")]
    BufferReleased(&'static str),
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;
