//! Invariant tests for penumbra_render
//!
//! These tests verify scheduling and bookkeeping guarantees of the light and
//! shadow pipeline that must hold across frames.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use penumbra_math::{Aabb, Vec3};
use penumbra_render::*;

fn boxed(name: &str, center: Vec3) -> Box<dyn RendererComponent> {
    Box::new(MeshRenderer::new(
        name,
        Aabb::from_center_half_extents(center, Vec3::splat(0.5)),
    ))
}

fn shadowed_point(name: &str, mode: ShadowMapUpdateMode) -> LightSource {
    LightSource::point(name, 5.0)
        .with_position(Vec3::new(0.0, 1.0, 0.0))
        .with_shadows(ShadowSettings::enabled(512, mode))
}

fn run_frames(scene: &mut Scene, frames: usize) -> Vec<FrameStats> {
    let mut orchestrator = FrameOrchestrator::default();
    let mut ctx = HeadlessContext::counting();
    (0..frames).map(|_| orchestrator.render_frame(scene, &mut ctx)).collect()
}

/// INVARIANT: A light is never in the shadow queue twice
#[test]
fn invariant_single_queue_entry_per_light() {
    let mut scene = Scene::default();
    let id = scene.add_light(shadowed_point("bulb", ShadowMapUpdateMode::EveryFrame));
    let crate_id = scene.add_drawable(boxed("crate", Vec3::X));

    for step in 0..5 {
        // every kind of invalidation at once
        scene
            .lights
            .light_mut(id)
            .unwrap()
            .set_intensity(1.0 + step as f32)
            .set_color(Vec3::new(1.0, 0.5, step as f32 * 0.1));
        scene
            .move_drawable(crate_id, Aabb::from_center_half_extents(Vec3::X * (1.0 + step as f32 * 0.1), Vec3::splat(0.5)))
            .unwrap();
        scene.lights.update(&mut scene.atlas, &scene.camera);

        let queued: Vec<LightId> = scene.lights.shadow_queue().collect();
        assert_eq!(queued, vec![id]);
        assert!(scene.lights.is_queued_for_shadow(id));

        // a second update before draining adds nothing
        scene.lights.update(&mut scene.atlas, &scene.camera);
        assert_eq!(scene.lights.shadow_queue_len(), 1);

        let popped = scene.lights.pop_shadow_update().unwrap();
        scene.lights.complete_shadow_update(popped, ShadowUpdateOutcome::Rendered);
    }
}

/// INVARIANT: Each activation notifies listeners with the set as it grows
#[test]
fn invariant_active_set_notifications_are_incremental() {
    let mut registry = LightRegistry::new();
    let mut atlas = ShadowAtlas::new(AtlasConfig::default());
    let seen: Arc<Mutex<Vec<Vec<LightId>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry.on_active_lights_changed(move |active| sink.lock().unwrap().push(active.to_vec()));

    let a = registry.register(LightSource::point("a", 1.0));
    let b = registry.register(LightSource::point("b", 2.0));
    let c = registry.register(LightSource::spot("c", 3.0, 0.2, 0.3));
    registry.update(&mut atlas, &Camera::default());

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![vec![a], vec![a, b], vec![a, b, c]]);
    assert_eq!(registry.active_lights(), &[a, b, c]);
}

/// INVARIANT: Disabling a light does not destroy its shadow map
#[test]
fn invariant_disable_keeps_shadow_allocation() {
    let mut registry = LightRegistry::new();
    let mut atlas = ShadowAtlas::new(AtlasConfig::default());
    let camera = Camera::default();
    let changes = Arc::new(Mutex::new(0u32));
    let counter = changes.clone();
    registry.on_shadow_map_changed(move |_, _| *counter.lock().unwrap() += 1);

    let id = registry.register(shadowed_point("bulb", ShadowMapUpdateMode::OnDemand));
    registry.update(&mut atlas, &camera);
    let original = atlas.get(id).cloned().unwrap();
    assert_eq!(*changes.lock().unwrap(), 1);

    registry.light_mut(id).unwrap().set_enabled(false);
    registry.update(&mut atlas, &camera);
    assert!(registry.active_lights().is_empty());
    assert_eq!(registry.light_state(id), Some(LightState::Inactive));
    assert_eq!(atlas.get(id).map(|a| a.regions().to_vec()), Some(original.regions().to_vec()));

    registry.light_mut(id).unwrap().set_enabled(true);
    registry.update(&mut atlas, &camera);
    assert_eq!(registry.active_lights(), &[id]);
    assert_eq!(atlas.get(id).unwrap().regions(), original.regions());
    assert_eq!(*changes.lock().unwrap(), 1);
}

/// INVARIANT: Directional and every-frame lights are refreshed every frame
#[test]
fn invariant_cadence_lights_requeued_each_frame() {
    let mut scene = Scene::default();
    let sun = scene.add_light(
        LightSource::directional("sun")
            .with_direction(Vec3::new(0.2, -1.0, 0.3))
            .with_shadows(ShadowSettings::enabled(1024, ShadowMapUpdateMode::OnDemand)),
    );
    let bulb = scene.add_light(shadowed_point("bulb", ShadowMapUpdateMode::EveryFrame));
    scene.add_drawable(boxed("crate", Vec3::ZERO));

    for stats in run_frames(&mut scene, 4) {
        assert_eq!(stats.shadows.lights_processed, 2);
        assert_eq!(stats.shadows.lights_rendered, 2);
    }
    assert_eq!(scene.lights.light_state(sun), Some(LightState::ShadowCurrent));
    assert_eq!(scene.lights.light_state(bulb), Some(LightState::ShadowCurrent));
}

/// INVARIANT: On-demand lights are only drawn after an invalidation
#[test]
fn invariant_on_demand_lights_idle_until_invalidated() {
    let mut scene = Scene::default();
    let id = scene.add_light(shadowed_point("bulb", ShadowMapUpdateMode::OnDemand));
    let crate_id = scene.add_drawable(boxed("crate", Vec3::X));
    let far_id = scene.add_drawable(boxed("far", Vec3::new(100.0, 0.0, 0.0)));

    let mut orchestrator = FrameOrchestrator::default();
    let mut ctx = HeadlessContext::counting();
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_rendered, 1);
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_processed, 0);

    // moving outside the light's reach changes nothing
    scene
        .move_drawable(far_id, Aabb::from_center_half_extents(Vec3::new(101.0, 0.0, 0.0), Vec3::splat(0.5)))
        .unwrap();
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_processed, 0);

    scene
        .move_drawable(crate_id, Aabb::from_center_half_extents(Vec3::new(1.0, 0.5, 0.0), Vec3::splat(0.5)))
        .unwrap();
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_rendered, 1);

    scene.lights.light_mut(id).unwrap().set_intensity(3.0);
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_rendered, 1);
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_processed, 0);
}

/// INVARIANT: An on-demand light whose screen footprint changes is re-queued at the new size
#[test]
fn invariant_footprint_change_requeues_on_demand_light() {
    let mut scene = Scene::default();
    let id = scene.add_light(
        LightSource::point("bulb", 5.0)
            .with_position(Vec3::new(0.0, 1.0, 0.0))
            .with_shadows(ShadowSettings::enabled(2048, ShadowMapUpdateMode::OnDemand)),
    );
    scene.add_drawable(boxed("crate", Vec3::X));
    scene.camera = Camera::new(Vec3::new(0.0, 1.0, 400.0), Vec3::new(0.0, 1.0, 0.0), 1.0, 1.0, 0.1, 1000.0);

    let mut orchestrator = FrameOrchestrator::default();
    let mut ctx = HeadlessContext::counting();
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_rendered, 1);
    let far_size = scene.atlas.get(id).unwrap().size;
    assert_eq!(far_size, 128);
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_processed, 0);

    scene.camera = Camera::new(Vec3::new(0.0, 1.0, 3.0), Vec3::new(0.0, 1.0, 0.0), 1.0, 1.0, 0.1, 1000.0);
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_rendered, 1);
    let near_size = scene.atlas.get(id).unwrap().size;
    assert_eq!(near_size, 2048);
    assert!(near_size > far_size);

    // a steady camera leaves the light idle again
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_processed, 0);
}

/// INVARIANT: BVH enumeration yields exactly the accepted leaves, once each
#[test]
fn invariant_bvh_enumeration_respects_filter() {
    let items: Vec<(u32, Aabb)> = (0..37u32)
        .map(|i| {
            let center = Vec3::new((i % 6) as f32 * 3.0, (i / 6) as f32 * 2.0, (i % 4) as f32);
            (i, Aabb::from_center_half_extents(center, Vec3::splat(0.4)))
        })
        .collect();
    let mut tree = BvhTree::new();
    tree.build(&items);
    let mut stack = Vec::new();

    let none = tree
        .enumerate(|_, _: &()| BvhFilterResult::Skip, &mut stack, &())
        .count();
    assert_eq!(none, 0);

    let leaves: Vec<u32> = tree
        .enumerate(|_, _: &()| BvhFilterResult::Keep, &mut stack, &())
        .filter_map(|node| node.object_index)
        .collect();
    let unique: BTreeSet<u32> = leaves.iter().copied().collect();
    assert_eq!(leaves.len(), items.len());
    assert_eq!(unique, (0..37u32).collect());
}

/// INVARIANT: A drawable lives in exactly the bucket of its queue index
#[test]
fn invariant_reclassification_moves_bucket() {
    let mut scene = Scene::default();
    let id = scene.add_drawable(boxed("glass", Vec3::ZERO));
    assert_eq!(scene.renderers.bucket_of(id), Some(RenderQueueBucket::Geometry));

    assert!(scene.set_queue_index(id, 5000).unwrap());
    assert_eq!(scene.renderers.bucket_of(id), Some(RenderQueueBucket::Overlay));
    assert!(scene.renderers.bucket(RenderQueueBucket::Geometry).is_empty());
    assert_eq!(scene.renderers.bucket(RenderQueueBucket::Overlay), &[id]);

    let stats = run_frames(&mut scene, 1).remove(0);
    assert_eq!(stats.opaque_draws, 0);
    assert_eq!(stats.overlay_draws, 1);
}

/// INVARIANT: Draining a light through the pass clears its queued flag
#[test]
fn invariant_drain_clears_queue_flag() {
    let mut scene = Scene::default();
    let ids: Vec<LightId> = (0..3)
        .map(|i| {
            scene.add_light(
                LightSource::spot(format!("spot{i}"), 8.0, 0.2, 0.4)
                    .with_position(Vec3::new(i as f32 * 2.0, 4.0, 0.0))
                    .with_direction(Vec3::NEG_Y)
                    .with_shadows(ShadowSettings::enabled(256, ShadowMapUpdateMode::OnDemand)),
            )
        })
        .collect();
    scene.add_drawable(boxed("floor", Vec3::ZERO));

    run_frames(&mut scene, 1);
    assert_eq!(scene.lights.shadow_queue_len(), 0);
    for id in ids {
        assert!(!scene.lights.is_queued_for_shadow(id));
        assert_eq!(scene.lights.light_state(id), Some(LightState::ShadowCurrent));
    }
}

/// INVARIANT: A light whose allocation failed is retried, never lost
#[test]
fn invariant_failed_allocation_is_retried() {
    let config = RenderConfig {
        atlas: AtlasConfig {
            size: 1024,
            min_region_size: 128,
        },
        ..Default::default()
    };
    let mut scene = Scene::new(&config);
    scene.camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0, 1.0, 0.1, 100.0);
    let hog = scene.add_light(
        LightSource::spot("hog", 10.0, 0.2, 0.4)
            .with_shadows(ShadowSettings::enabled(1024, ShadowMapUpdateMode::OnDemand)),
    );
    let starved = scene.add_light(shadowed_point("starved", ShadowMapUpdateMode::OnDemand));

    let mut orchestrator = FrameOrchestrator::new(&config);
    let mut ctx = HeadlessContext::counting();
    let stats = orchestrator.render_frame(&mut scene, &mut ctx);
    assert_eq!(stats.lights.allocation_failures, 1);
    assert_eq!(stats.shadows.skipped, 1);
    assert!(!scene.atlas.contains(starved));

    // keeps coming back while the atlas is full
    for _ in 0..3 {
        let stats = orchestrator.render_frame(&mut scene, &mut ctx);
        assert_eq!(stats.shadows.skipped, 1);
        assert_eq!(scene.lights.light_state(starved), Some(LightState::ShadowPending));
    }

    scene.lights.light_mut(hog).unwrap().set_shadow_enabled(false);
    // the freed space is used in the same frame as the release
    assert_eq!(orchestrator.render_frame(&mut scene, &mut ctx).shadows.lights_rendered, 1);
    assert!(scene.atlas.contains(starved));
    assert_eq!(scene.lights.light_state(starved), Some(LightState::ShadowCurrent));
}

/// INVARIANT: Light buffer follows activation order, shadow indices are dense
#[test]
fn invariant_buffer_order_and_dense_shadow_indices() {
    let mut scene = Scene::default();
    let plain = scene.add_light(LightSource::point("plain", 1.0));
    let first = scene.add_light(shadowed_point("first", ShadowMapUpdateMode::OnDemand));
    let second = scene.add_light(
        LightSource::spot("second", 6.0, 0.2, 0.3)
            .with_shadows(ShadowSettings::enabled(256, ShadowMapUpdateMode::OnDemand)),
    );
    let third = scene.add_light(
        LightSource::directional("third").with_shadows(ShadowSettings::enabled(1024, ShadowMapUpdateMode::EveryFrame)),
    );
    run_frames(&mut scene, 1);

    let shadow_indices: Vec<i32> = scene
        .lights
        .light_buffer()
        .as_slice()
        .iter()
        .map(|l| l.shadow_index)
        .collect();
    assert_eq!(shadow_indices, vec![-1, 0, 1, 2]);
    assert_eq!(scene.lights.shadow_buffer().count(), 3);
    assert_eq!(scene.lights.active_lights(), &[plain, first, second, third]);

    // removing a shadow light compacts the indices of later ones
    scene.remove_light(first).unwrap();
    run_frames(&mut scene, 1);
    let shadow_indices: Vec<i32> = scene
        .lights
        .light_buffer()
        .as_slice()
        .iter()
        .map(|l| l.shadow_index)
        .collect();
    assert_eq!(shadow_indices, vec![-1, 0, 1]);
    assert_eq!(scene.lights.light(second).unwrap().queue_index(), Some(0));
    assert_eq!(scene.lights.light(third).unwrap().queue_index(), Some(1));
}
