//! # penumbra_render - Deferred Light and Shadow Management
//!
//! Backend-agnostic light/shadow core of a deferred renderer:
//! - Light registry with dirty tracking and an ordered active set
//! - Shared shadow atlas with quadtree allocation
//! - Shadow update scheduling for directional, point and spot lights
//! - BVH over drawables for shadow caster culling
//! - Render queue classification of drawables
//! - Per-frame orchestration over a [`GraphicsContext`]
//!
//! ## Architecture
//!
//! 1. **Light Registry**: turns light changes into shadow update requests
//!    and packs the GPU-visible light, shadow and probe buffers
//! 2. **Shadow Map Pass**: drains the requests, queries the BVH for casters
//!    and draws them into the atlas
//! 3. **Render Manager**: owns the drawables and supplies main-pass order
//!
//! ## Example
//!
//! ```ignore
//! use penumbra_render::prelude::*;
//!
//! let mut scene = Scene::new(&RenderConfig::default());
//! scene.add_light(
//!     LightSource::directional("sun")
//!         .with_direction(Vec3::new(0.3, -1.0, 0.2))
//!         .with_shadows(ShadowSettings::enabled(2048, ShadowMapUpdateMode::EveryFrame)),
//! );
//! scene.add_drawable(Box::new(MeshRenderer::new("ground", ground_bounds)));
//!
//! let mut orchestrator = FrameOrchestrator::new(&RenderConfig::default());
//! let mut ctx = HeadlessContext::new();
//! let stats = orchestrator.render_frame(&mut scene, &mut ctx);
//! ```

pub mod backend;
pub mod camera;
pub mod error;
pub mod frame;
pub mod id;
pub mod light;
pub mod queue;
pub mod scene;
pub mod shadow;
pub mod spatial;

pub use backend::{
    BufferKind, ContextCommand, GraphicsContext, HeadlessContext, HeadlessStats, RenderPath, ShadowFormat,
    ShadowTargetDesc, TargetHandle, Viewport,
};
pub use camera::Camera;
pub use error::{RenderError, RenderResult};
pub use frame::{FrameOrchestrator, FramePhase, FrameStats};
pub use id::{DrawableId, LightId, ProbeId};
pub use light::{
    GpuLight, GpuProbe, LightMut, LightRegistry, LightSource, LightState, LightType, LightUpdateStats, LightVariant,
    Probe, ShadowUpdateOutcome, StructuredBuffer,
};
pub use queue::{
    CullingContext, Drawable, MeshRenderer, QueueMask, RenderManager, RenderQueueBucket, RenderQueueIndex,
    RenderQueueStats, RendererComponent, RendererFlags,
};
pub use scene::{RenderConfig, Scene};
pub use shadow::{
    round_shadow_size, AtlasConfig, AtlasRegion, GpuShadowData, ShadowAllocation, ShadowAtlas, ShadowConfig, ShadowMapPass,
    ShadowMapUpdateMode, ShadowPassParams, ShadowPassStats, ShadowQuality, ShadowSettings, ShadowType,
    SoftShadowMode, MAX_SHADOW_SIZE,
};
pub use spatial::{BvhFilterResult, BvhNode, BvhTree};

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{GraphicsContext, HeadlessContext, RenderPath};
    pub use crate::camera::Camera;
    pub use crate::frame::{FrameOrchestrator, FrameStats};
    pub use crate::id::{DrawableId, LightId};
    pub use crate::light::{LightRegistry, LightSource, LightVariant, Probe};
    pub use crate::queue::{MeshRenderer, RenderQueueIndex, RendererComponent, RendererFlags};
    pub use crate::scene::{RenderConfig, Scene};
    pub use crate::shadow::{ShadowConfig, ShadowMapUpdateMode, ShadowSettings, SoftShadowMode};
    pub use penumbra_math::prelude::*;
}
