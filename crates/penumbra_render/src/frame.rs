//! Frame Orchestration
//!
//! Runs one frame of the deferred pipeline over a [`Scene`]:
//!
//! ```text
//! Update -> Cull -> Shadows -> Geometry -> Lighting -> Forward -> Overlay -> Post
//! ```
//!
//! Shadow maps are refreshed before any main-pass draw, so the lighting
//! resolve of the same frame samples current shadow data.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::backend::{BufferKind, GraphicsContext, RenderPath};
use crate::light::LightUpdateStats;
use crate::queue::{CullingContext, QueueMask};
use crate::scene::{RenderConfig, Scene};
use crate::shadow::pass::{ShadowMapPass, ShadowPassStats};

/// Phases of a frame, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FramePhase {
    Update,
    Cull,
    Shadows,
    Geometry,
    Lighting,
    Forward,
    Overlay,
    Post,
}

impl FramePhase {
    pub const ALL: [Self; 8] = [
        Self::Update,
        Self::Cull,
        Self::Shadows,
        Self::Geometry,
        Self::Lighting,
        Self::Forward,
        Self::Overlay,
        Self::Post,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Cull => "cull",
            Self::Shadows => "shadows",
            Self::Geometry => "geometry",
            Self::Lighting => "lighting",
            Self::Forward => "forward",
            Self::Overlay => "overlay",
            Self::Post => "post",
        }
    }
}

/// Statistics of one rendered frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    pub lights: LightUpdateStats,
    pub shadows: ShadowPassStats,
    pub bvh_rebuilt: bool,
    pub culled: u32,
    pub depth_draws: u32,
    pub opaque_draws: u32,
    pub forward_draws: u32,
    pub overlay_draws: u32,
    /// Fraction of atlas texels allocated at the end of the frame
    pub atlas_utilization: f32,
}

/// Per-frame driver of the light and shadow pipeline
pub struct FrameOrchestrator {
    shadow_pass: ShadowMapPass,
    depth_prepass: bool,
    frame: u64,
    last: FrameStats,
}

impl FrameOrchestrator {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            shadow_pass: ShadowMapPass::new(),
            depth_prepass: config.depth_prepass,
            frame: 0,
            last: FrameStats::default(),
        }
    }

    /// Render one frame
    ///
    /// Never fails: resource shortages degrade to stale shadows and are logged.
    pub fn render_frame(&mut self, scene: &mut Scene, ctx: &mut dyn GraphicsContext) -> FrameStats {
        self.frame += 1;
        let mut stats = FrameStats {
            frame: self.frame,
            ..Default::default()
        };
        let Scene {
            lights,
            renderers,
            atlas,
            camera,
        } = scene;

        atlas.begin_frame();

        ctx.begin_phase(FramePhase::Update);
        stats.bvh_rebuilt = renderers.update();
        stats.lights = lights.update(atlas, camera);
        ctx.end_phase(FramePhase::Update);

        ctx.begin_phase(FramePhase::Cull);
        let culling = CullingContext {
            frustum: camera.frustum(),
            camera_position: camera.position,
        };
        stats.culled = renderers.visibility_test(&culling);
        ctx.end_phase(FramePhase::Cull);

        ctx.begin_phase(FramePhase::Shadows);
        stats.shadows = self.shadow_pass.execute(lights, atlas, renderers, camera, ctx);
        ctx.end_phase(FramePhase::Shadows);

        ctx.begin_phase(FramePhase::Geometry);
        if self.depth_prepass {
            stats.depth_draws = renderers.draw_depth(QueueMask::OPAQUE, ctx);
        }
        stats.opaque_draws = renderers.draw(QueueMask::OPAQUE, ctx, RenderPath::Deferred);
        ctx.end_phase(FramePhase::Geometry);

        ctx.begin_phase(FramePhase::Lighting);
        if !lights.is_destroyed() {
            let (light_buffer, shadow_buffer, probe_buffer) =
                (lights.light_buffer(), lights.shadow_buffer(), lights.probe_buffer());
            ctx.upload_buffer(BufferKind::Lights, light_buffer.as_bytes(), light_buffer.count());
            ctx.upload_buffer(BufferKind::ShadowData, shadow_buffer.as_bytes(), shadow_buffer.count());
            ctx.upload_buffer(BufferKind::Probes, probe_buffer.as_bytes(), probe_buffer.count());
            ctx.lighting_pass(light_buffer.count(), shadow_buffer.count(), probe_buffer.count());
        }
        ctx.end_phase(FramePhase::Lighting);

        ctx.begin_phase(FramePhase::Forward);
        stats.forward_draws = renderers.draw(QueueMask::TRANSPARENCY, ctx, RenderPath::Forward);
        ctx.end_phase(FramePhase::Forward);

        ctx.begin_phase(FramePhase::Overlay);
        stats.overlay_draws = renderers.draw(QueueMask::OVERLAY, ctx, RenderPath::Forward);
        ctx.end_phase(FramePhase::Overlay);

        ctx.begin_phase(FramePhase::Post);
        ctx.post_process();
        ctx.end_phase(FramePhase::Post);

        stats.atlas_utilization = atlas.utilization();
        debug!(
            "Frame {}: {} lights ({} shadowed), {} shadow views, {} opaque / {} forward draws, atlas {:.1}%",
            stats.frame,
            stats.lights.lights,
            stats.lights.shadow_lights,
            stats.shadows.views_rendered,
            stats.opaque_draws,
            stats.forward_draws,
            stats.atlas_utilization * 100.0
        );

        self.last = stats.clone();
        stats
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn last_stats(&self) -> &FrameStats {
        &self.last
    }

    pub fn shadow_pass(&self) -> &ShadowMapPass {
        &self.shadow_pass
    }
}

impl Default for FrameOrchestrator {
    fn default() -> Self {
        Self::new(&RenderConfig::default())
    }
}
