//! Cascaded Shadow Map Calculations
//!
//! Splits the camera range into depth bands and fits a light-space
//! orthographic projection around each band.
//!
//! # Split scheme
//!
//! Splits blend logarithmic and uniform distributions:
//! - lambda = 0: uniform in view space
//! - lambda = 1: logarithmic (uniform in screen space)

use glam::{Mat4, Vec3, Vec4};
use penumbra_math::{Frustum, Sphere};

use crate::camera::Camera;

/// Maximum supported cascade count
pub const MAX_CASCADES: usize = 4;

/// Practical split distances
///
/// `[0]` is `near`, `[count]` is `far`, unused tail entries repeat `far`.
pub fn calculate_splits(near: f32, far: f32, cascade_count: u32, lambda: f32) -> [f32; MAX_CASCADES + 1] {
    let mut splits = [far; MAX_CASCADES + 1];
    let count = cascade_count.clamp(1, MAX_CASCADES as u32) as usize;
    let lambda = lambda.clamp(0.0, 1.0);
    let near = near.max(1e-3);

    splits[0] = near;
    for (i, split) in splits.iter_mut().enumerate().take(count + 1).skip(1) {
        let p = i as f32 / count as f32;
        let log_split = near * (far / near).powf(p);
        let lin_split = near + (far - near) * p;
        *split = lambda * log_split + (1.0 - lambda) * lin_split;
    }

    splits
}

/// One fitted cascade
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cascade {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub frustum: Frustum,
    pub near: f32,
    pub far: f32,
    /// World units covered by one shadow texel
    pub texel_size: f32,
}

/// Cascades of one directional light for the current camera
#[derive(Clone, Debug, PartialEq)]
pub struct CascadeSet {
    pub count: usize,
    pub splits: [f32; MAX_CASCADES + 1],
    pub cascades: [Cascade; MAX_CASCADES],
}

impl CascadeSet {
    /// Fit `count` cascades over `[camera.near, min(camera.far, shadow_distance)]`
    pub fn compute(
        camera: &Camera,
        light_direction: Vec3,
        count: u32,
        lambda: f32,
        shadow_distance: f32,
        resolution: u32,
    ) -> Self {
        let count = count.clamp(1, MAX_CASCADES as u32);
        let far = camera.far.min(shadow_distance).max(camera.near + 0.01);
        let splits = calculate_splits(camera.near, far, count, lambda);
        let direction = light_direction.normalize_or_zero();
        let direction = if direction == Vec3::ZERO { Vec3::NEG_Y } else { direction };

        let view = camera.view();
        let mut cascades = [Cascade::identity(); MAX_CASCADES];
        for (i, cascade) in cascades.iter_mut().enumerate().take(count as usize) {
            let slice = camera.projection_slice(splits[i], splits[i + 1]) * view;
            *cascade = fit_cascade(&slice, direction, resolution);
            cascade.near = splits[i];
            cascade.far = splits[i + 1];
        }

        Self {
            count: count as usize,
            splits,
            cascades,
        }
    }

    pub fn active(&self) -> &[Cascade] {
        &self.cascades[..self.count]
    }

    /// Cascade frusta, for BVH filtering
    pub fn frusta(&self) -> [Frustum; MAX_CASCADES] {
        let mut frusta = [Frustum::default(); MAX_CASCADES];
        for (dst, cascade) in frusta.iter_mut().zip(self.active()) {
            *dst = cascade.frustum;
        }
        frusta
    }

    /// Cascade index covering a view-space depth
    pub fn cascade_for_depth(&self, view_depth: f32) -> usize {
        (0..self.count)
            .find(|&i| view_depth < self.splits[i + 1])
            .unwrap_or(self.count.saturating_sub(1))
    }
}

impl Cascade {
    fn identity() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            frustum: Frustum::default(),
            near: 0.0,
            far: 0.0,
            texel_size: 0.0,
        }
    }
}

/// Fit an orthographic light view around the bounding sphere of a camera slice
fn fit_cascade(slice_view_projection: &Mat4, direction: Vec3, resolution: u32) -> Cascade {
    let corners = Frustum::corners(slice_view_projection);
    let sphere = Sphere::from_points(&corners);
    // round up so the projection size stays constant while the camera rotates
    let radius = (sphere.radius * 16.0).ceil() / 16.0;
    let radius = radius.max(0.01);

    let eye = sphere.center - direction * radius * 2.0;
    let view = Mat4::look_to_rh(eye, direction, up_vector(direction));
    let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 4.0);
    let view_projection = snap_to_texel(projection * view, resolution);

    Cascade {
        view,
        projection,
        view_projection,
        frustum: Frustum::from_view_projection(&view_projection),
        near: 0.0,
        far: 0.0,
        texel_size: radius * 2.0 / resolution.max(1) as f32,
    }
}

fn up_vector(direction: Vec3) -> Vec3 {
    if direction.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Snap the projected world origin to the texel grid to stop shadow swimming
fn snap_to_texel(mut matrix: Mat4, resolution: u32) -> Mat4 {
    let origin = matrix * Vec4::W;
    let texel = 2.0 / resolution.max(1) as f32;
    let snapped_x = (origin.x / texel).round() * texel;
    let snapped_y = (origin.y / texel).round() * texel;
    matrix.w_axis.x += snapped_x - origin.x;
    matrix.w_axis.y += snapped_y - origin.y;
    matrix
}
