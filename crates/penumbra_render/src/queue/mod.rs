//! Render Queue Classification
//!
//! Drawables are partitioned into six ordered buckets by their numeric
//! queue index:
//!
//! | Queue index        | Bucket       |
//! |--------------------|--------------|
//! | `0..100`           | Background   |
//! | `100..2000`        | Geometry     |
//! | `2000..2500`       | AlphaTest    |
//! | `2500..3000`       | GeometryLast |
//! | `3000..4000`       | Transparency |
//! | `4000..`           | Overlay      |
//!
//! Only the Geometry bucket is subject to camera culling.

pub mod component;
pub mod flags;
pub mod index;
pub mod manager;

pub use component::{CullingContext, MeshRenderer, RendererComponent};
pub use flags::RendererFlags;
pub use index::{QueueMask, RenderQueueBucket, RenderQueueIndex};
pub use manager::{Drawable, RenderManager, RenderQueueStats};
