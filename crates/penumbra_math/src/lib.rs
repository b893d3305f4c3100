//! # penumbra_math
//!
//! Bounding volumes and view-frustum tests used by the shadow and culling
//! code. Vector and matrix types come straight from `glam`.

pub mod bounds;
pub mod frustum;

pub use bounds::{Aabb, Sphere};
pub use frustum::{Frustum, FrustumTestResult, Plane};

pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Prelude for common imports
pub mod prelude {
    pub use crate::bounds::{Aabb, Sphere};
    pub use crate::frustum::{Frustum, FrustumTestResult, Plane};
    pub use glam::{Mat4, Quat, Vec3, Vec4};
}
