//! Shadow Mapping System
//!
//! Backend-agnostic shadow mapping for directional, point and spot lights.
//!
//! # Architecture
//!
//! - **Config**: global and per-light shadow settings
//! - **Cascade**: cascade splits and fitted light-space views
//! - **Atlas**: quadtree allocation of the shared shadow atlas
//! - **Data**: GPU-ready shadow records and per-view constants
//! - **Pass**: drains the shadow update queue and draws the casters
//!
//! # Hot-Reload Support
//!
//! Configuration and allocation data derive serde. Scratch targets are
//! recreated lazily by the pass after a reload.

pub mod atlas;
pub mod cascade;
pub mod config;
pub mod data;
pub mod pass;

pub use atlas::{AtlasConfig, AtlasRegion, AtlasStats, ShadowAllocation, ShadowAtlas, MAX_REGIONS_PER_LIGHT};
pub use cascade::{calculate_splits, Cascade, CascadeSet, MAX_CASCADES};
pub use config::{
    round_shadow_size, ShadowConfig, ShadowMapUpdateMode, ShadowQuality, ShadowSettings, SoftShadowMode, MAX_SHADOW_SIZE,
};
pub use data::{GpuShadowData, ShadowPassParams, ShadowType};
pub use pass::{ShadowMapPass, ShadowPassStats};
