//! penumbra demo
//!
//! Builds a small courtyard scene and drives it through the frame loop on a
//! headless context, logging per-frame statistics.
//!
//! Run with: cargo run --bin penumbra -- [config.toml]
//!       or: PENUMBRA_CONFIG=config.toml cargo run --bin penumbra

use std::process::ExitCode;

use glam::{Quat, Vec3};
use log::{error, info};
use penumbra_engine::{EngineConfig, EngineContext, EngineResult};
use penumbra_math::Aabb;
use penumbra_render::{
    HeadlessContext, LightSource, MeshRenderer, RenderQueueIndex, Scene, ShadowMapUpdateMode, ShadowSettings,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("penumbra failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> EngineResult<EngineConfig> {
    let path = std::env::args().nth(1).or_else(|| std::env::var("PENUMBRA_CONFIG").ok());
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => {
            info!("No config given, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

fn run() -> EngineResult<()> {
    let config = load_config()?;
    let frames = config.frames;
    let mut context = EngineContext::new(config);
    context.init()?;

    {
        let scene = context.scene()?;
        let mut scene = scene.lock();
        populate(&mut scene);
    }

    let mut ctx = HeadlessContext::counting();
    let stats = context.run(frames, &mut ctx, animate)?;

    let totals = ctx.stats();
    info!(
        "Rendered {} frames ({} updates): {} draws, {} atlas copies, {} lighting passes",
        stats.frames, stats.updates, totals.draws, totals.atlas_copies, totals.lighting_passes
    );
    info!(
        "Last frame: {} lights, {} shadow views, atlas {:.1}% used",
        stats.last.lights.lights,
        stats.last.shadows.views_rendered,
        stats.last.atlas_utilization * 100.0
    );

    context.shutdown();
    Ok(())
}

fn populate(scene: &mut Scene) {
    let shadows = scene.lights.config().light_settings(ShadowMapUpdateMode::OnDemand);

    scene.add_light(
        LightSource::directional("sun")
            .with_direction(Vec3::new(0.4, -1.0, 0.25))
            .with_color(Vec3::new(1.0, 0.95, 0.85), 3.0)
            .with_shadows(ShadowSettings::enabled(2048, ShadowMapUpdateMode::EveryFrame)),
    );
    scene.add_light(
        LightSource::spot("lantern", 12.0, 0.3, 0.5)
            .with_position(Vec3::new(0.0, 6.0, 0.0))
            .with_direction(Vec3::NEG_Y)
            .with_shadows(shadows.clone()),
    );
    scene.add_light(
        LightSource::point("brazier", 6.0)
            .with_position(Vec3::new(4.0, 1.0, -3.0))
            .with_color(Vec3::new(1.0, 0.5, 0.2), 2.0)
            .with_shadows(shadows),
    );
    scene.add_light(LightSource::point("fill", 20.0).with_position(Vec3::new(-6.0, 4.0, 6.0)));

    scene.add_drawable(Box::new(MeshRenderer::new(
        "ground",
        Aabb::from_center_half_extents(Vec3::new(0.0, -0.1, 0.0), Vec3::new(20.0, 0.1, 20.0)),
    )));
    for i in 0..6 {
        let angle = i as f32 * std::f32::consts::TAU / 6.0;
        let center = Vec3::new(angle.cos() * 5.0, 1.0, angle.sin() * 5.0);
        scene.add_drawable(Box::new(MeshRenderer::new(
            format!("pillar{i}"),
            Aabb::from_center_half_extents(center, Vec3::new(0.4, 1.0, 0.4)),
        )));
    }
    scene.add_drawable(Box::new(
        MeshRenderer::new(
            "glass",
            Aabb::from_center_half_extents(Vec3::new(0.0, 1.0, 3.0), Vec3::new(1.0, 1.0, 0.05)),
        )
        .with_queue_index(RenderQueueIndex::TRANSPARENCY),
    ));
    scene.add_drawable(Box::new(
        MeshRenderer::new("hud", Aabb::EMPTY).with_queue_index(RenderQueueIndex::OVERLAY),
    ));
}

/// Orbit the lantern and bob one pillar, so on-demand shadows get refreshed
fn animate(scene: &mut Scene, frame: u64) {
    let t = frame as f32 / 60.0;

    let lantern = scene.lights.lights().find(|l| l.name() == "lantern").map(|l| l.id());
    if let Some(mut light) = lantern.and_then(|id| scene.lights.light_mut(id)) {
        light
            .set_position(Vec3::new(t.cos() * 2.0, 6.0, t.sin() * 2.0))
            .set_rotation(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2));
    }

    if frame % 30 == 0 {
        let pillar = scene.renderers.drawables().find(|d| d.name() == "pillar0").map(|d| d.id());
        if let Some(id) = pillar {
            let lift = if frame % 60 == 0 { 0.5 } else { 0.0 };
            let bounds = Aabb::from_center_half_extents(Vec3::new(5.0, 1.0 + lift, 0.0), Vec3::new(0.4, 1.0, 0.4));
            if let Err(e) = scene.move_drawable(id, bounds) {
                error!("Failed to move pillar: {}", e);
            }
        }
    }
}
