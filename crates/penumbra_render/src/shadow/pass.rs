//! Shadow Map Pass
//!
//! Drains the registry's shadow update queue once per frame and redraws
//! the shadow maps of every dequeued light into its atlas regions.
//!
//! Each light renders into a scratch target first and is then copied into
//! the atlas, so filtered techniques can blur without bleeding into
//! neighbouring regions:
//!
//! - **Directional**: one layer per cascade of a layered scratch target
//! - **Point**: two paraboloid hemispheres through a single-layer target
//! - **Spot**: one perspective view through a single-layer target
//!
//! Casters are found through the render manager's BVH. A light without an
//! atlas allocation, or whose scratch target cannot be created, is skipped
//! and marked dirty so the next registry update retries it.

use std::collections::BTreeSet;

use log::{debug, trace, warn};
use penumbra_math::{Aabb, Frustum};
use serde::{Deserialize, Serialize};

use crate::backend::{GraphicsContext, ShadowFormat, ShadowTargetDesc, TargetHandle, Viewport};
use crate::camera::Camera;
use crate::error::{RenderError, RenderResult};
use crate::id::LightId;
use crate::light::{LightRegistry, LightSource, LightVariant, ShadowUpdateOutcome, ShadowView, ShadowViews};
use crate::queue::{RenderManager, RendererFlags};
use crate::shadow::atlas::{ShadowAllocation, ShadowAtlas};
use crate::shadow::config::ShadowConfig;
use crate::shadow::data::{ShadowPassParams, ShadowType};
use crate::spatial::{aabb_filter, cascade_filter, frustum_filter, BvhFilterResult, BvhNode};

/// Shadow pass statistics of one frame
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowPassStats {
    /// Lights dequeued this frame
    pub lights_processed: u32,
    /// Lights whose views were drawn
    pub lights_rendered: u32,
    /// Lights left stale for lack of an allocation or scratch target
    pub skipped: u32,
    /// Lights dequeued after their shadows were turned off
    pub dropped: u32,
    /// Views (cascades, hemispheres, spot frusta) drawn
    pub views_rendered: u32,
    /// Cascades held back by `cascade_update_interval`
    pub views_deferred: u32,
    /// Caster draws issued
    pub casters_drawn: u32,
    pub targets_created: u32,
    pub targets_resized: u32,
}

#[derive(Clone, Copy, Debug)]
struct ScratchTarget {
    handle: TargetHandle,
    desc: ShadowTargetDesc,
}

/// Why a light could not be drawn this frame
enum SkipReason {
    NoAllocation,
    Target(RenderError),
}

/// Shadow update scheduler
pub struct ShadowMapPass {
    /// Single-layer target for point and spot lights
    scratch: Option<ScratchTarget>,
    /// Layered target, one layer per cascade
    cascade_scratch: Option<ScratchTarget>,
    stack: Vec<u32>,
    casters: Vec<u32>,
    frame: u64,
    stats: ShadowPassStats,
    /// Lights whose current skip has already been logged
    skip_logged: BTreeSet<LightId>,
}

impl ShadowMapPass {
    pub fn new() -> Self {
        Self {
            scratch: None,
            cascade_scratch: None,
            stack: Vec::new(),
            casters: Vec::new(),
            frame: 0,
            stats: ShadowPassStats::default(),
            skip_logged: BTreeSet::new(),
        }
    }

    /// Drain the shadow update queue completely
    pub fn execute(
        &mut self,
        registry: &mut LightRegistry,
        atlas: &ShadowAtlas,
        renderers: &mut RenderManager,
        camera: &Camera,
        ctx: &mut dyn GraphicsContext,
    ) -> ShadowPassStats {
        self.frame += 1;
        self.stats = ShadowPassStats::default();
        renderers.update();

        while let Some(id) = registry.pop_shadow_update() {
            self.stats.lights_processed += 1;
            let outcome = match registry.light(id) {
                Some(light) => self.process_light(light, registry.config(), atlas, renderers, camera, ctx),
                None => ShadowUpdateOutcome::Dropped,
            };
            match outcome {
                ShadowUpdateOutcome::Rendered => self.stats.lights_rendered += 1,
                ShadowUpdateOutcome::Skipped => self.stats.skipped += 1,
                ShadowUpdateOutcome::Dropped => {
                    self.skip_logged.remove(&id);
                    self.stats.dropped += 1;
                }
            }
            registry.complete_shadow_update(id, outcome);
        }

        // unregistered lights never reach the queue again
        self.skip_logged.retain(|id| registry.light(*id).is_some());

        if self.stats.lights_processed > 0 {
            debug!(
                "Shadow pass frame {}: {} rendered, {} skipped, {} views, {} casters",
                self.frame,
                self.stats.lights_rendered,
                self.stats.skipped,
                self.stats.views_rendered,
                self.stats.casters_drawn
            );
        }

        self.stats.clone()
    }

    pub fn stats(&self) -> &ShadowPassStats {
        &self.stats
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Handle of the single-layer scratch target, once created
    pub fn scratch_target(&self) -> Option<TargetHandle> {
        self.scratch.map(|s| s.handle)
    }

    /// Handle of the layered cascade target, once created
    pub fn cascade_target(&self) -> Option<TargetHandle> {
        self.cascade_scratch.map(|s| s.handle)
    }

    fn process_light(
        &mut self,
        light: &LightSource,
        config: &ShadowConfig,
        atlas: &ShadowAtlas,
        renderers: &mut RenderManager,
        camera: &Camera,
        ctx: &mut dyn GraphicsContext,
    ) -> ShadowUpdateOutcome {
        if !light.is_enabled() || !light.casts_shadows() {
            trace!("Light {:?} dropped from shadow queue", light.id());
            return ShadowUpdateOutcome::Dropped;
        }

        let result = match atlas.get(light.id()) {
            Some(allocation) => {
                let views = light.update_shadow_map(camera, config, allocation);
                match light.variant() {
                    LightVariant::Directional { .. } => {
                        self.render_directional(light, config, allocation, &views, renderers, ctx)
                    }
                    LightVariant::Point { .. } => self.render_point(light, config, allocation, &views, renderers, ctx),
                    LightVariant::Spot { .. } => self.render_spot(light, config, allocation, &views, renderers, ctx),
                }
            }
            None => Err(SkipReason::NoAllocation),
        };

        match result {
            Ok(()) => {
                self.skip_logged.remove(&light.id());
                ShadowUpdateOutcome::Rendered
            }
            Err(reason) => {
                let message = match reason {
                    SkipReason::NoAllocation => "no atlas allocation".to_string(),
                    SkipReason::Target(e) => e.to_string(),
                };
                if self.skip_logged.insert(light.id()) {
                    warn!("Shadow map of light {:?} '{}' skipped: {}", light.id(), light.name(), message);
                } else {
                    trace!("Shadow map of light {:?} skipped again: {}", light.id(), message);
                }
                ShadowUpdateOutcome::Skipped
            }
        }
    }

    fn render_directional(
        &mut self,
        light: &LightSource,
        config: &ShadowConfig,
        allocation: &ShadowAllocation,
        views: &ShadowViews,
        renderers: &mut RenderManager,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<(), SkipReason> {
        let desc = ShadowTargetDesc {
            width: allocation.size,
            height: allocation.size,
            layers: views.len().max(1) as u32,
            format: ShadowFormat::for_mode(config.soft_shadow_mode),
        };
        let target = acquire_target(&mut self.cascade_scratch, desc, ctx, &mut self.stats).map_err(SkipReason::Target)?;

        let frusta = views.frusta();
        collect_casters(renderers, &mut self.stack, &mut self.casters, cascade_filter, &frusta[..views.len()]);

        for (index, view) in views.iter().enumerate() {
            // a stale cascade is only acceptable once its region holds valid content
            let interval = config.cascade_update_interval[index].max(1) as u64;
            if light.shadow_current && self.frame % interval != 0 {
                self.stats.views_deferred += 1;
                continue;
            }

            let layer = index as u32;
            let params = view_params(light, view, layer, ShadowType::Cascaded, allocation.size);
            begin_view(ctx, target, layer, allocation.size, &params);
            self.stats.casters_drawn += draw_casters(
                &self.casters,
                renderers,
                ctx,
                &params,
                ShadowType::Cascaded,
                Some(&view.frustum),
            );
            finish_view(ctx, target, layer, view.destination, config);
            self.stats.views_rendered += 1;
        }

        Ok(())
    }

    fn render_point(
        &mut self,
        light: &LightSource,
        config: &ShadowConfig,
        allocation: &ShadowAllocation,
        views: &ShadowViews,
        renderers: &mut RenderManager,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<(), SkipReason> {
        let target = self.acquire_scratch(allocation.size, config, ctx)?;

        let volume = light.influence_bounds().unwrap_or(Aabb::EMPTY);
        collect_casters(renderers, &mut self.stack, &mut self.casters, aabb_filter, &volume);

        for (index, view) in views.iter().enumerate() {
            let params = view_params(light, view, index as u32, ShadowType::Paraboloid, allocation.size);
            begin_view(ctx, target, 0, allocation.size, &params);
            self.stats.casters_drawn +=
                draw_casters(&self.casters, renderers, ctx, &params, ShadowType::Paraboloid, None);
            finish_view(ctx, target, 0, view.destination, config);
            self.stats.views_rendered += 1;
        }

        Ok(())
    }

    fn render_spot(
        &mut self,
        light: &LightSource,
        config: &ShadowConfig,
        allocation: &ShadowAllocation,
        views: &ShadowViews,
        renderers: &mut RenderManager,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<(), SkipReason> {
        let Some(view) = views.get(0) else {
            return Ok(());
        };
        let target = self.acquire_scratch(allocation.size, config, ctx)?;

        collect_casters(renderers, &mut self.stack, &mut self.casters, frustum_filter, &view.frustum);

        let params = view_params(light, view, 0, ShadowType::Perspective, allocation.size);
        begin_view(ctx, target, 0, allocation.size, &params);
        self.stats.casters_drawn += draw_casters(&self.casters, renderers, ctx, &params, ShadowType::Perspective, None);
        finish_view(ctx, target, 0, view.destination, config);
        self.stats.views_rendered += 1;

        Ok(())
    }

    fn acquire_scratch(
        &mut self,
        size: u32,
        config: &ShadowConfig,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<TargetHandle, SkipReason> {
        let desc = ShadowTargetDesc {
            width: size,
            height: size,
            layers: 1,
            format: ShadowFormat::for_mode(config.soft_shadow_mode),
        };
        acquire_target(&mut self.scratch, desc, ctx, &mut self.stats).map_err(SkipReason::Target)
    }
}

impl Default for ShadowMapPass {
    fn default() -> Self {
        Self::new()
    }
}

/// Reuse the scratch target, recreating it only on a size or format mismatch
fn acquire_target(
    slot: &mut Option<ScratchTarget>,
    desc: ShadowTargetDesc,
    ctx: &mut dyn GraphicsContext,
    stats: &mut ShadowPassStats,
) -> RenderResult<TargetHandle> {
    match slot {
        Some(target) if target.desc == desc => Ok(target.handle),
        Some(target) => {
            ctx.resize_shadow_target(target.handle, &desc)?;
            target.desc = desc;
            stats.targets_resized += 1;
            Ok(target.handle)
        }
        None => {
            let handle = ctx.create_shadow_target(&desc)?;
            *slot = Some(ScratchTarget { handle, desc });
            stats.targets_created += 1;
            Ok(handle)
        }
    }
}

fn collect_casters<C, F>(renderers: &RenderManager, stack: &mut Vec<u32>, casters: &mut Vec<u32>, filter: F, context: &C)
where
    C: ?Sized,
    F: FnMut(&BvhNode, &C) -> BvhFilterResult,
{
    casters.clear();
    for node in renderers.bvh().enumerate(filter, stack, context) {
        let Some(index) = node.object_index else {
            continue;
        };
        let casts = renderers
            .drawable_at(index)
            .map_or(false, |d| d.flags().contains(RendererFlags::CAST_SHADOWS));
        if casts {
            casters.push(index);
        }
    }
}

fn view_params(light: &LightSource, view: &ShadowView, view_index: u32, shadow_type: ShadowType, resolution: u32) -> ShadowPassParams {
    ShadowPassParams::new(
        &view.view_projection,
        &view.view,
        light.position().to_array(),
        view.near,
        view.far,
        view.hemisphere,
        light.shadow().depth_bias,
        view_index,
        shadow_type,
        resolution,
    )
}

fn begin_view(ctx: &mut dyn GraphicsContext, target: TargetHandle, layer: u32, size: u32, params: &ShadowPassParams) {
    ctx.clear_target(target, layer);
    ctx.bind_shadow_target(target, layer, Viewport::square(size));
    ctx.set_shadow_params(params);
}

fn finish_view(ctx: &mut dyn GraphicsContext, target: TargetHandle, layer: u32, destination: Viewport, config: &ShadowConfig) {
    if config.soft_shadow_mode.needs_filter() {
        ctx.filter_shadow(target, layer, config.soft_shadow_mode, config.filter_radius);
    }
    ctx.copy_to_atlas(target, layer, destination);
}

/// Draw the collected casters, optionally culled against one cascade
fn draw_casters(
    casters: &[u32],
    renderers: &mut RenderManager,
    ctx: &mut dyn GraphicsContext,
    params: &ShadowPassParams,
    shadow_type: ShadowType,
    cull: Option<&Frustum>,
) -> u32 {
    let mut drawn = 0;
    for &index in casters {
        let Some(drawable) = renderers.drawable_at_mut(index) else {
            continue;
        };
        if let Some(frustum) = cull {
            if !frustum.intersects_aabb(&drawable.bounds()) {
                continue;
            }
        }
        drawable.component.draw_shadow_map(ctx, params, shadow_type);
        drawn += 1;
    }
    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContextCommand, HeadlessContext};
    use crate::light::LightState;
    use crate::queue::MeshRenderer;
    use crate::shadow::atlas::AtlasConfig;
    use crate::shadow::config::{ShadowMapUpdateMode, ShadowSettings, SoftShadowMode};
    use glam::Vec3;

    struct Fixture {
        registry: LightRegistry,
        atlas: ShadowAtlas,
        renderers: RenderManager,
        camera: Camera,
        pass: ShadowMapPass,
        ctx: HeadlessContext,
    }

    impl Fixture {
        fn new(config: ShadowConfig, atlas_size: u32) -> Self {
            Self {
                registry: LightRegistry::with_config(config),
                atlas: ShadowAtlas::new(AtlasConfig {
                    size: atlas_size,
                    min_region_size: 128,
                }),
                renderers: RenderManager::new(),
                camera: Camera::default(),
                pass: ShadowMapPass::new(),
                ctx: HeadlessContext::new(),
            }
        }

        fn frame(&mut self) -> ShadowPassStats {
            self.atlas.begin_frame();
            self.registry.update(&mut self.atlas, &self.camera);
            self.pass
                .execute(&mut self.registry, &self.atlas, &mut self.renderers, &self.camera, &mut self.ctx)
        }

        fn add_box(&mut self, name: &str, center: Vec3) {
            self.renderers.add(Box::new(MeshRenderer::new(
                name,
                Aabb::from_center_half_extents(center, Vec3::splat(0.5)),
            )));
        }
    }

    fn on_demand(size: u32) -> ShadowSettings {
        ShadowSettings::enabled(size, ShadowMapUpdateMode::OnDemand)
    }

    #[test]
    fn test_spot_light_draws_casters_in_frustum() {
        let mut fx = Fixture::new(ShadowConfig::default(), 4096);
        fx.add_box("below", Vec3::new(0.0, 0.0, 0.0));
        fx.add_box("aside", Vec3::new(40.0, 0.0, 0.0));
        let id = fx.registry.register(
            LightSource::spot("torch", 20.0, 0.2, 0.4)
                .with_position(Vec3::new(0.0, 10.0, 0.0))
                .with_direction(Vec3::NEG_Y)
                .with_shadows(on_demand(512)),
        );

        let stats = fx.frame();
        assert_eq!(stats.lights_rendered, 1);
        assert_eq!(stats.views_rendered, 1);
        assert_eq!(fx.ctx.draw_labels(), vec!["shadow:below"]);
        assert!(!fx.registry.is_queued_for_shadow(id));
        assert_eq!(fx.registry.light_state(id), Some(LightState::ShadowCurrent));
    }

    #[test]
    fn test_point_light_renders_two_hemispheres() {
        let mut fx = Fixture::new(ShadowConfig::default(), 4096);
        fx.add_box("crate", Vec3::new(1.0, 0.0, 0.0));
        fx.registry
            .register(LightSource::point("bulb", 5.0).with_shadows(on_demand(512)));

        let stats = fx.frame();
        assert_eq!(stats.views_rendered, 2);
        assert_eq!(stats.casters_drawn, 2);
        assert_eq!(fx.ctx.stats().atlas_copies, 2);

        let hemispheres: Vec<f32> = fx
            .ctx
            .commands()
            .iter()
            .filter_map(|c| match c {
                ContextCommand::ShadowParams(p) => Some(p.near_far[2]),
                _ => None,
            })
            .collect();
        assert_eq!(hemispheres, vec![1.0, -1.0]);
    }

    #[test]
    fn test_non_casters_are_skipped() {
        let mut fx = Fixture::new(ShadowConfig::default(), 4096);
        fx.renderers.add(Box::new(
            MeshRenderer::new("glass", Aabb::from_center_half_extents(Vec3::X, Vec3::splat(0.5)))
                .with_flags(RendererFlags::DEFAULT.with(RendererFlags::CAST_SHADOWS, false)),
        ));
        fx.registry
            .register(LightSource::point("bulb", 5.0).with_shadows(on_demand(512)));

        let stats = fx.frame();
        assert_eq!(stats.views_rendered, 2);
        assert_eq!(stats.casters_drawn, 0);
    }

    #[test]
    fn test_directional_renders_every_cascade_every_frame() {
        let mut fx = Fixture::new(ShadowConfig::default(), 8192);
        fx.add_box("ground", Vec3::ZERO);
        fx.registry.register(
            LightSource::directional("sun")
                .with_direction(Vec3::new(0.3, -1.0, 0.2))
                .with_shadows(ShadowSettings::enabled(1024, ShadowMapUpdateMode::OnDemand)),
        );

        let first = fx.frame();
        assert_eq!(first.views_rendered, 4);
        let second = fx.frame();
        assert_eq!(second.lights_processed, 1);
        assert_eq!(second.views_rendered, 4);
        assert_eq!(fx.ctx.stats().targets_created, 1);
        let target = fx.pass.cascade_target().unwrap();
        assert_eq!(fx.ctx.target_desc(target).unwrap().layers, 4);
    }

    #[test]
    fn test_cascade_update_interval_defers_far_cascades() {
        let config = ShadowConfig {
            cascade_update_interval: [1, 1, 2, 2],
            ..Default::default()
        };
        let mut fx = Fixture::new(config, 8192);
        fx.registry.register(
            LightSource::directional("sun")
                .with_direction(Vec3::NEG_Y)
                .with_shadows(ShadowSettings::enabled(1024, ShadowMapUpdateMode::EveryFrame)),
        );

        // first frame draws everything, the shadow map holds no content yet
        assert_eq!(fx.frame().views_rendered, 4);
        // pass frame 2: every cascade is due
        assert_eq!(fx.frame().views_rendered, 4);
        // pass frame 3: cascades 2 and 3 wait
        let third = fx.frame();
        assert_eq!(third.views_rendered, 2);
        assert_eq!(third.views_deferred, 2);
    }

    #[test]
    fn test_missing_allocation_skips_and_retries() {
        let mut fx = Fixture::new(ShadowConfig::default(), 1024);
        // fills the whole atlas
        let hog = fx.registry.register(
            LightSource::spot("hog", 10.0, 0.2, 0.4).with_shadows(ShadowSettings::enabled(1024, ShadowMapUpdateMode::OnDemand)),
        );
        fx.camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0, 1.0, 0.1, 100.0);
        let starved = fx.registry.register(
            LightSource::point("starved", 5.0).with_shadows(on_demand(256)),
        );

        let stats = fx.frame();
        assert!(fx.atlas.contains(hog));
        assert!(!fx.atlas.contains(starved));
        assert_eq!(stats.skipped, 1);
        assert!(!fx.registry.is_queued_for_shadow(starved));
        assert_eq!(fx.registry.light_state(starved), Some(LightState::ShadowPending));

        // the release lands before the retry in the same frame
        fx.registry.light_mut(hog).unwrap().set_shadow_enabled(false);
        let stats = fx.frame();
        assert!(!fx.atlas.contains(hog));
        assert!(fx.atlas.contains(starved));
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.lights_rendered, 1);
        assert_eq!(fx.registry.light_state(starved), Some(LightState::ShadowCurrent));
        assert_eq!(fx.frame().lights_processed, 0);
    }

    #[test]
    fn test_skip_log_forgets_unregistered_lights() {
        let mut fx = Fixture::new(ShadowConfig::default(), 1024);
        fx.camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0, 1.0, 0.1, 100.0);
        fx.registry.register(
            LightSource::spot("hog", 10.0, 0.2, 0.4).with_shadows(ShadowSettings::enabled(1024, ShadowMapUpdateMode::OnDemand)),
        );
        let starved = fx.registry.register(LightSource::point("starved", 5.0).with_shadows(on_demand(256)));

        assert_eq!(fx.frame().skipped, 1);
        assert!(fx.pass.skip_logged.contains(&starved));

        fx.registry.unregister(starved, &mut fx.atlas).unwrap();
        fx.frame();
        assert!(fx.pass.skip_logged.is_empty());
    }

    #[test]
    fn test_target_failure_skips_light() {
        let mut fx = Fixture::new(ShadowConfig::default(), 4096);
        fx.ctx = HeadlessContext::new().with_max_target_size(256);
        let id = fx
            .registry
            .register(LightSource::spot("torch", 10.0, 0.2, 0.4).with_shadows(on_demand(1024)));
        fx.camera = Camera::new(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, 1.0, 1.0, 0.1, 100.0);

        let stats = fx.frame();
        assert_eq!(stats.skipped, 1);
        assert!(!fx.registry.is_queued_for_shadow(id));
        assert!(fx.pass.scratch_target().is_none());
    }

    #[test]
    fn test_filtered_mode_blurs_each_view() {
        let config = ShadowConfig {
            soft_shadow_mode: SoftShadowMode::Evsm,
            ..Default::default()
        };
        let mut fx = Fixture::new(config, 4096);
        fx.registry
            .register(LightSource::point("bulb", 5.0).with_shadows(on_demand(512)));

        fx.frame();
        assert_eq!(fx.ctx.stats().filters, 2);
        let target = fx.pass.scratch_target().unwrap();
        assert_eq!(fx.ctx.target_desc(target).unwrap().format, ShadowFormat::Moments32);
    }

    #[test]
    fn test_on_demand_light_idle_until_dirty() {
        let mut fx = Fixture::new(ShadowConfig::default(), 4096);
        let id = fx
            .registry
            .register(LightSource::spot("torch", 10.0, 0.2, 0.4).with_shadows(on_demand(512)));

        assert_eq!(fx.frame().lights_processed, 1);
        assert_eq!(fx.frame().lights_processed, 0);

        fx.registry.light_mut(id).unwrap().set_intensity(5.0);
        assert_eq!(fx.frame().lights_processed, 1);
    }
}
