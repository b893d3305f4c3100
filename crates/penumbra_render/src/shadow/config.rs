//! Shadow Configuration
//!
//! Global shadow settings shared by the registry and the shadow map pass,
//! plus the per-light settings carried by every `LightSource`.

use serde::{Deserialize, Serialize};

use super::cascade::MAX_CASCADES;

/// Largest per-light resolution a setting can hold
pub const MAX_SHADOW_SIZE: u32 = 1 << 31;

/// Round a requested resolution up to a power of two in `1..=MAX_SHADOW_SIZE`
pub fn round_shadow_size(size: u32) -> u32 {
    size.clamp(1, MAX_SHADOW_SIZE).next_power_of_two()
}

/// Global shadow configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Default per-light shadow map resolution (power of 2)
    pub default_resolution: u32,

    /// Smallest resolution the footprint LOD may pick
    pub min_resolution: u32,

    /// Upper bound on cascades per directional light (1-4)
    pub cascade_count: u32,

    /// Cascade split lambda (0 = linear, 1 = logarithmic)
    pub cascade_lambda: f32,

    /// Maximum shadow distance from the camera
    pub shadow_distance: f32,

    /// Cascade `i` is redrawn on frames where `frame % interval[i] == 0`
    pub cascade_update_interval: [u32; MAX_CASCADES],

    /// Soft shadow technique
    pub soft_shadow_mode: SoftShadowMode,

    /// Blur radius in texels for filtered modes
    pub filter_radius: f32,

    /// Resolution in texels per pixel of on-screen light footprint
    pub lod_scale: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            default_resolution: 1024,
            min_resolution: 128,
            cascade_count: 4,
            cascade_lambda: 0.5,
            shadow_distance: 100.0,
            cascade_update_interval: [1; MAX_CASCADES],
            soft_shadow_mode: SoftShadowMode::Pcf,
            filter_radius: 2.0,
            lod_scale: 2.0,
        }
    }
}

impl ShadowConfig {
    /// Create a high-quality shadow configuration
    pub fn high_quality() -> Self {
        Self {
            default_resolution: 2048,
            min_resolution: 256,
            cascade_lambda: 0.75,
            soft_shadow_mode: SoftShadowMode::Esm,
            lod_scale: 4.0,
            ..Default::default()
        }
    }

    /// Create a low-quality shadow configuration for performance
    pub fn low_quality() -> Self {
        Self {
            default_resolution: 512,
            min_resolution: 64,
            cascade_count: 2,
            shadow_distance: 50.0,
            cascade_update_interval: [1, 2, 4, 8],
            soft_shadow_mode: SoftShadowMode::Hard,
            lod_scale: 1.0,
            ..Default::default()
        }
    }

    /// Clamp values to valid ranges
    pub fn validate(&mut self) {
        self.default_resolution = self.default_resolution.clamp(64, 8192).next_power_of_two();
        self.min_resolution = self
            .min_resolution
            .clamp(16, self.default_resolution)
            .next_power_of_two();
        self.cascade_count = self.cascade_count.clamp(1, MAX_CASCADES as u32);
        self.cascade_lambda = self.cascade_lambda.clamp(0.0, 1.0);
        self.shadow_distance = self.shadow_distance.max(1.0);
        for interval in &mut self.cascade_update_interval {
            *interval = (*interval).max(1);
        }
        self.filter_radius = self.filter_radius.max(0.0);
        self.lod_scale = self.lod_scale.max(0.01);
    }

    /// Shadows-on light settings at the default resolution
    pub fn light_settings(&self, update_mode: ShadowMapUpdateMode) -> ShadowSettings {
        ShadowSettings::enabled(self.default_resolution, update_mode)
    }
}

/// Soft shadow technique, ordered by cost
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftShadowMode {
    Hard,
    #[default]
    Pcf,
    Pcss,
    /// Exponential shadow maps
    Esm,
    /// Exponential variance shadow maps
    Evsm,
}

impl SoftShadowMode {
    /// Filtered modes need a blur pass after drawing
    #[inline]
    pub fn needs_filter(self) -> bool {
        self >= SoftShadowMode::Esm
    }
}

/// Shadow map refresh policy of a light
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowMapUpdateMode {
    /// Redraw every frame
    EveryFrame,
    /// Redraw only when the light, nearby geometry or its footprint changes
    #[default]
    OnDemand,
}

/// Per-light shadow settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    pub enabled: bool,
    pub update_mode: ShadowMapUpdateMode,
    /// Requested (maximum) resolution, power of 2
    pub size: u32,
    pub depth_bias: f32,
    pub normal_bias: f32,
    /// Penumbra size hint for filtered modes
    pub softness: f32,
    /// Near plane of the shadow camera
    pub near_plane: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            update_mode: ShadowMapUpdateMode::OnDemand,
            size: 1024,
            depth_bias: 0.005,
            normal_bias: 0.02,
            softness: 1.0,
            near_plane: 0.1,
        }
    }
}

impl ShadowSettings {
    /// Shadows on, with the given resolution and mode
    pub fn enabled(size: u32, update_mode: ShadowMapUpdateMode) -> Self {
        Self {
            enabled: true,
            update_mode,
            size: round_shadow_size(size),
            ..Default::default()
        }
    }

    pub fn with_bias(mut self, depth_bias: f32, normal_bias: f32) -> Self {
        self.depth_bias = depth_bias;
        self.normal_bias = normal_bias;
        self
    }
}

/// Shadow quality preset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowQuality {
    Low,
    Medium,
    High,
    Ultra,
}

impl ShadowQuality {
    pub fn to_config(self) -> ShadowConfig {
        match self {
            Self::Low => ShadowConfig::low_quality(),
            Self::Medium => ShadowConfig::default(),
            Self::High => ShadowConfig::high_quality(),
            Self::Ultra => ShadowConfig {
                default_resolution: 4096,
                min_resolution: 512,
                cascade_lambda: 0.8,
                shadow_distance: 150.0,
                soft_shadow_mode: SoftShadowMode::Evsm,
                filter_radius: 3.0,
                lod_scale: 4.0,
                ..Default::default()
            },
        }
    }
}
