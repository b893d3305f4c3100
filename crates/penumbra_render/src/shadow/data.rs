//! GPU shadow data structures
//!
//! `#[repr(C)]` Pod types matching the shader-side layouts. Shaders index
//! the shadow buffer by a light's `queue_index`.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use super::cascade::MAX_CASCADES;

/// Projection family of a shadow draw, passed to every caster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ShadowType {
    /// Orthographic cascade of a directional light
    Cascaded = 0,
    /// One hemisphere of a dual-paraboloid point light
    Paraboloid = 1,
    /// Perspective spot light
    Perspective = 2,
}

/// Per-view constant block uploaded before casters draw
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowPassParams {
    pub view_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    /// xyz = light position, w = far plane
    pub light_position: [f32; 4],
    /// near, far, hemisphere direction (+1/-1, 0 if unused), depth bias
    pub near_far: [f32; 4],
    pub view_index: u32,
    pub shadow_type: u32,
    pub resolution: u32,
    pub _pad: u32,
}

impl ShadowPassParams {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        view_projection: &Mat4,
        view: &Mat4,
        light_position: [f32; 3],
        near: f32,
        far: f32,
        hemisphere: f32,
        depth_bias: f32,
        view_index: u32,
        shadow_type: ShadowType,
        resolution: u32,
    ) -> Self {
        Self {
            view_projection: view_projection.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            light_position: [light_position[0], light_position[1], light_position[2], far],
            near_far: [near, far, hemisphere, depth_bias],
            view_index,
            shadow_type: shadow_type as u32,
            resolution,
            _pad: 0,
        }
    }

    pub fn shadow_type(&self) -> Option<ShadowType> {
        match self.shadow_type {
            0 => Some(ShadowType::Cascaded),
            1 => Some(ShadowType::Paraboloid),
            2 => Some(ShadowType::Perspective),
            _ => None,
        }
    }
}

/// Shadow lookup data of one light
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuShadowData {
    /// One matrix per cascade / hemisphere / spot view (column-major)
    pub view_projections: [[[f32; 4]; 4]; MAX_CASCADES],
    /// Atlas rectangles in UV space, `[u, v, width, height]`
    pub regions: [[f32; 4]; MAX_CASCADES],
    /// Far distance of each cascade
    pub cascade_splits: [f32; MAX_CASCADES],
    /// depth bias, normal bias, softness, texel size in UV
    pub bias: [f32; 4],
    /// Number of valid views (0 while the atlas has no room for the light)
    pub view_count: u32,
    pub shadow_type: u32,
    pub _pad: [u32; 2],
}

impl GpuShadowData {
    /// Size in bytes (must be 16-byte aligned)
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_shadow_layout() {
        assert_eq!(GpuShadowData::SIZE % 16, 0);
        assert_eq!(core::mem::size_of::<ShadowPassParams>() % 16, 0);
    }

    #[test]
    fn test_pass_params_round_trip_type() {
        let params = ShadowPassParams::new(
            &Mat4::IDENTITY,
            &Mat4::IDENTITY,
            [1.0, 2.0, 3.0],
            0.1,
            25.0,
            -1.0,
            0.005,
            1,
            ShadowType::Paraboloid,
            512,
        );
        assert_eq!(params.shadow_type(), Some(ShadowType::Paraboloid));
        assert_eq!(params.light_position, [1.0, 2.0, 3.0, 25.0]);
        assert_eq!(params.near_far[2], -1.0);
    }

    #[test]
    fn test_pass_params_bytes() {
        let params = ShadowPassParams::default();
        let bytes: &[u8] = bytemuck::bytes_of(&params);
        assert_eq!(bytes.len(), core::mem::size_of::<ShadowPassParams>());
    }
}
