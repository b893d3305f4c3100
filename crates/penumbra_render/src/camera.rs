//! Camera snapshot consumed by culling, cascades and shadow LOD

use glam::{Mat4, Vec3};
use penumbra_math::Frustum;

/// Perspective camera state for one frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    /// Output height in pixels, used for screen-space footprint estimates
    pub viewport_height: f32,
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            forward: (target - position).normalize_or_zero(),
            up: Vec3::Y,
            fov_y,
            aspect,
            near,
            far,
            viewport_height: 1080.0,
        }
    }

    pub fn with_viewport_height(mut self, height: f32) -> Self {
        self.viewport_height = height.max(1.0);
        self
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.forward = (target - self.position).normalize_or_zero();
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    #[inline]
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Projection limited to a depth slice, used for cascade fitting
    #[inline]
    pub fn projection_slice(&self, near: f32, far: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, near, far)
    }

    #[inline]
    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }

    /// Approximate on-screen diameter in pixels of a sphere
    ///
    /// Returns the full viewport height when the camera is inside the sphere.
    pub fn projected_diameter(&self, center: Vec3, radius: f32) -> f32 {
        let distance = self.position.distance(center);
        if distance <= radius {
            return self.viewport_height;
        }
        let scale = 1.0 / (self.fov_y * 0.5).tan();
        let diameter = radius * scale / distance * self.viewport_height;
        diameter.min(self.viewport_height)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(
            Vec3::new(0.0, 2.0, 10.0),
            Vec3::ZERO,
            60f32.to_radians(),
            16.0 / 9.0,
            0.1,
            200.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projected_diameter_shrinks_with_distance() {
        let camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z, 90f32.to_radians(), 1.0, 0.1, 100.0)
            .with_viewport_height(1000.0);
        let near = camera.projected_diameter(Vec3::new(0.0, 0.0, -10.0), 1.0);
        let far = camera.projected_diameter(Vec3::new(0.0, 0.0, -40.0), 1.0);
        assert!(near > far);
        assert!((near - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_projected_diameter_inside_sphere() {
        let camera = Camera::default();
        assert_eq!(camera.projected_diameter(camera.position, 5.0), camera.viewport_height);
    }

    #[test]
    fn test_camera_frustum_sees_target() {
        let camera = Camera::default();
        assert!(camera.frustum().contains_point(Vec3::ZERO));
    }
}
