//! Lights and Probes
//!
//! - **Source**: `LightSource` and its type-specific `LightVariant`
//! - **Registry**: ownership, dirty tracking, active set and buffer packing
//! - **Buffer**: GPU-ready records and the per-frame structured buffer
//! - **Probe**: global ambient/reflection probes
//!
//! # Usage
//!
//! ```ignore
//! use penumbra_render::light::*;
//!
//! let mut registry = LightRegistry::new();
//! let sun = registry.register(LightSource::directional("sun").with_direction(Vec3::NEG_Y));
//!
//! // every effective change marks the light dirty
//! registry.light_mut(sun).unwrap().set_intensity(3.0);
//!
//! // once per frame, before the shadow pass
//! let stats = registry.update(&mut atlas, &camera);
//! ```

pub mod buffer;
pub mod probe;
pub mod registry;
pub mod source;

pub use buffer::{GpuLight, GpuProbe, StructuredBuffer};
pub use probe::Probe;
pub use registry::{
    DrawableUpdate, LightMut, LightRegistry, LightState, LightUpdateStats, ShadowUpdateOutcome,
};
pub use source::{LightSource, LightType, LightVariant, ShadowView, ShadowViews};
