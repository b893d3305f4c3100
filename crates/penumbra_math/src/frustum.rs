//! Frustum culling types
//!
//! Planes are extracted from a view-projection matrix with a `[0, 1]`
//! depth range, which is what `glam`'s `*_rh` projections produce.

use glam::{Mat4, Vec3, Vec4};

use crate::bounds::{Aabb, Sphere};

/// Plane in 3D space (`normal . p + distance = 0`)
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Plane {
    /// Unit normal, pointing into the kept half-space
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    /// Create a plane, normalizing the equation
    #[inline]
    pub fn new(normal: Vec3, distance: f32) -> Self {
        let len = normal.length();
        if len > 1e-10 {
            Self {
                normal: normal / len,
                distance: distance / len,
            }
        } else {
            Self {
                normal: Vec3::Y,
                distance: 0.0,
            }
        }
    }

    #[inline]
    fn from_vec4(v: Vec4) -> Self {
        Self::new(v.truncate(), v.w)
    }

    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// Signed distance, positive in front of the plane
    #[inline]
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            normal: Vec3::Y,
            distance: 0.0,
        }
    }
}

/// Result of a frustum containment test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrustumTestResult {
    Inside,
    Outside,
    Intersecting,
}

impl FrustumTestResult {
    #[inline]
    pub fn is_visible(&self) -> bool {
        *self != FrustumTestResult::Outside
    }

    #[inline]
    pub fn is_inside(&self) -> bool {
        *self == FrustumTestResult::Inside
    }
}

/// Six-plane view frustum (left, right, bottom, top, near, far)
///
/// All normals point inward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const BOTTOM: usize = 2;
    pub const TOP: usize = 3;
    pub const NEAR: usize = 4;
    pub const FAR: usize = 5;

    /// Extract planes from a combined view-projection matrix (Gribb/Hartmann)
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let r0 = vp.row(0);
        let r1 = vp.row(1);
        let r2 = vp.row(2);
        let r3 = vp.row(3);

        Self {
            planes: [
                Plane::from_vec4(r3 + r0),
                Plane::from_vec4(r3 - r0),
                Plane::from_vec4(r3 + r1),
                Plane::from_vec4(r3 - r1),
                // zero-to-one depth: the near plane is row 2 alone
                Plane::from_vec4(r2),
                Plane::from_vec4(r3 - r2),
            ],
        }
    }

    /// Inside / outside / intersecting test using the p- and n-vertex of each plane
    pub fn contains_aabb(&self, aabb: &Aabb) -> FrustumTestResult {
        let mut result = FrustumTestResult::Inside;

        for plane in &self.planes {
            let positive = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            let negative = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.min, aabb.max);

            if plane.distance_to_point(positive) < 0.0 {
                return FrustumTestResult::Outside;
            }
            if plane.distance_to_point(negative) < 0.0 {
                result = FrustumTestResult::Intersecting;
            }
        }

        result
    }

    /// Conservative visibility test, true if the box may be visible
    #[inline]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let positive = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            plane.distance_to_point(positive) >= 0.0
        })
    }

    #[inline]
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }

    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// World-space corners of the frustum volume described by `view_projection`
    ///
    /// Order: near plane (4), then far plane (4).
    pub fn corners(view_projection: &Mat4) -> [Vec3; 8] {
        let inv = view_projection.inverse();
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        for z in [0.0f32, 1.0] {
            for y in [-1.0f32, 1.0] {
                for x in [-1.0f32, 1.0] {
                    corners[i] = inv.project_point3(Vec3::new(x, y, z));
                    i += 1;
                }
            }
        }
        corners
    }
}

impl Default for Frustum {
    fn default() -> Self {
        Self {
            planes: [Plane::default(); 6],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera_frustum() -> Frustum {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_plane_distance_to_point() {
        let plane = Plane::new(Vec3::Y, 0.0);
        assert_relative_eq!(plane.distance_to_point(Vec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_relative_eq!(plane.distance_to_point(Vec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_frustum_contains_aabb() {
        let frustum = camera_frustum();

        let inside = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        assert_eq!(frustum.contains_aabb(&inside), FrustumTestResult::Inside);

        let behind = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::ONE);
        assert_eq!(frustum.contains_aabb(&behind), FrustumTestResult::Outside);
        assert!(!frustum.intersects_aabb(&behind));

        let straddling = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, -100.0), Vec3::splat(5.0));
        assert_eq!(frustum.contains_aabb(&straddling), FrustumTestResult::Intersecting);
    }

    #[test]
    fn test_frustum_sphere_and_point() {
        let frustum = camera_frustum();
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -5.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 5.0)));
        assert!(frustum.intersects_sphere(&Sphere::new(Vec3::new(0.0, 0.0, 0.5), 1.0)));
    }

    #[test]
    fn test_frustum_corners_span_depth() {
        let proj = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 1.0, 10.0);
        let corners = Frustum::corners(&proj);
        assert_relative_eq!(corners[0].z, -1.0, epsilon = 1e-4);
        assert_relative_eq!(corners[7].z, -10.0, epsilon = 1e-4);
    }
}
