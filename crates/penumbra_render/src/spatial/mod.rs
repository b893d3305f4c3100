//! Spatial Acceleration Structures
//!
//! A bounding volume hierarchy over the drawables of a `RenderManager`,
//! queried by the shadow pass to find the casters of each light.

mod bvh;

pub use bvh::*;
