//! Light Registry
//!
//! Owns every light and probe, tracks which lights are active, decides
//! which shadow maps need redrawing, and packs the GPU-visible buffers.
//!
//! # Dirty tracking
//!
//! Lights are mutated through [`LightMut`]. Every setter that changes a
//! value marks the light dirty: the light's `dirty` flag is set and its id
//! pushed to the dirty queue, unless it is already pending. The queue is
//! drained by [`LightRegistry::update`].
//!
//! # Per-frame update
//!
//! `update` runs four steps, strictly in this order:
//!
//! 1. drain the dirty queue (releases, then activation, atlas allocation
//!    and shadow enqueue)
//! 2. revalidate on-demand lights against drawables that moved
//! 3. re-queue lights by cadence (directional, every-frame, footprint LOD)
//! 4. rebuild the light, shadow and probe buffers in active-set order
//!
//! The shadow update queue is drained by
//! [`ShadowMapPass`](crate::shadow::pass::ShadowMapPass).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use glam::{Quat, Vec3};
use log::{debug, trace, warn};
use penumbra_math::Aabb;

use crate::camera::Camera;
use crate::error::{RenderError, RenderResult};
use crate::id::{DrawableId, LightId, ProbeId};
use crate::light::buffer::{GpuLight, GpuProbe, StructuredBuffer};
use crate::light::probe::Probe;
use crate::light::source::{LightSource, LightVariant};
use crate::shadow::atlas::{ShadowAllocation, ShadowAtlas};
use crate::shadow::config::{round_shadow_size, ShadowConfig, ShadowMapUpdateMode};
use crate::shadow::data::GpuShadowData;

/// Listener for active-set transitions, receives the live set
pub type ActiveLightsListener = Box<dyn FnMut(&[LightId]) + Send>;
/// Listener fired for every processed dirty light
pub type LightUpdatedListener = Box<dyn FnMut(&LightSource) + Send>;
/// Listener fired when a light's atlas allocation appears, moves or goes away
pub type ShadowMapListener = Box<dyn FnMut(LightId, Option<&ShadowAllocation>) + Send>;

/// Registry-side state of a light
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightState {
    Inactive,
    NoShadow,
    ShadowPending,
    ShadowCurrent,
}

/// How a shadow update left the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShadowUpdateOutcome {
    /// Drawn into a valid atlas allocation
    Rendered,
    /// Not drawn for lack of resources, retried on the next update
    Skipped,
    /// Not drawn because the light no longer casts shadows
    Dropped,
}

/// A drawable whose bounds changed this frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawableUpdate {
    pub id: DrawableId,
    pub previous: Option<Aabb>,
    pub current: Option<Aabb>,
}

/// Counters of one `update` call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LightUpdateStats {
    pub dirty_processed: u32,
    pub activated: u32,
    pub deactivated: u32,
    pub allocation_failures: u32,
    pub drawable_requeued: u32,
    pub cadence_requeued: u32,
    pub lights: u32,
    pub shadow_lights: u32,
    pub probes: u32,
}

#[derive(Default)]
struct Listeners {
    active_changed: Vec<ActiveLightsListener>,
    updated: Vec<LightUpdatedListener>,
    shadow_map_changed: Vec<ShadowMapListener>,
}

impl Listeners {
    fn active_changed(&mut self, active: &[LightId]) {
        for listener in &mut self.active_changed {
            listener(active);
        }
    }

    fn updated(&mut self, light: &LightSource) {
        for listener in &mut self.updated {
            listener(light);
        }
    }

    fn shadow_map_changed(&mut self, id: LightId, allocation: Option<&ShadowAllocation>) {
        for listener in &mut self.shadow_map_changed {
            listener(id, allocation);
        }
    }
}

/// Owner of lights, probes and their GPU buffers
pub struct LightRegistry {
    config: ShadowConfig,
    lights: BTreeMap<LightId, LightSource>,
    probes: BTreeMap<ProbeId, Probe>,
    next_light: u32,
    next_probe: u32,

    /// Enabled lights in activation order
    active: Vec<LightId>,
    dirty_queue: VecDeque<LightId>,
    shadow_queue: VecDeque<LightId>,
    drawable_updates: Vec<DrawableUpdate>,
    /// Lights whose last allocation attempt failed
    starved: BTreeSet<LightId>,

    light_buffer: StructuredBuffer<GpuLight>,
    shadow_buffer: StructuredBuffer<GpuShadowData>,
    probe_buffer: StructuredBuffer<GpuProbe>,

    listeners: Listeners,
    frame: u64,
    stats: LightUpdateStats,
}

impl LightRegistry {
    pub fn new() -> Self {
        Self::with_config(ShadowConfig::default())
    }

    pub fn with_config(mut config: ShadowConfig) -> Self {
        config.validate();
        Self {
            config,
            lights: BTreeMap::new(),
            probes: BTreeMap::new(),
            next_light: 0,
            next_probe: 0,
            active: Vec::new(),
            dirty_queue: VecDeque::new(),
            shadow_queue: VecDeque::new(),
            drawable_updates: Vec::new(),
            starved: BTreeSet::new(),
            light_buffer: StructuredBuffer::new("lights"),
            shadow_buffer: StructuredBuffer::new("shadow data"),
            probe_buffer: StructuredBuffer::new("probes"),
            listeners: Listeners::default(),
            frame: 0,
            stats: LightUpdateStats::default(),
        }
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Add a light and queue it for its first update
    pub fn register(&mut self, mut light: LightSource) -> LightId {
        let id = LightId::new(self.next_light, 0);
        self.next_light += 1;

        light.id = id;
        light.dirty = true;
        light.in_update_queue = false;
        light.shadow_current = false;
        light.queue_index = None;
        debug!("Registered light {:?} '{}' ({:?})", id, light.name, light.light_type());

        self.lights.insert(id, light);
        self.dirty_queue.push_back(id);
        id
    }

    /// Remove a light from every list and release its shadow map
    pub fn unregister(&mut self, id: LightId, atlas: &mut ShadowAtlas) -> RenderResult<LightSource> {
        let light = self.lights.remove(&id).ok_or(RenderError::UnknownLight(id))?;

        self.dirty_queue.retain(|l| *l != id);
        self.shadow_queue.retain(|l| *l != id);
        self.starved.remove(&id);

        if let Some(pos) = self.active.iter().position(|l| *l == id) {
            self.active.remove(pos);
            self.listeners.active_changed(&self.active);
        }

        if atlas.release(id) {
            self.listeners.shadow_map_changed(id, None);
        }

        debug!("Unregistered light {:?} '{}'", id, light.name);
        Ok(light)
    }

    /// Destroy every shadow map and drop all lights, probes and pending work
    pub fn clear(&mut self, atlas: &mut ShadowAtlas) {
        for id in self.lights.keys() {
            if atlas.release(*id) {
                self.listeners.shadow_map_changed(*id, None);
            }
        }
        let had_active = !self.active.is_empty();

        self.lights.clear();
        self.probes.clear();
        self.active.clear();
        self.dirty_queue.clear();
        self.shadow_queue.clear();
        self.drawable_updates.clear();
        self.starved.clear();

        if had_active {
            self.listeners.active_changed(&self.active);
        }
    }

    /// Release the GPU buffers; later rebuilds are skipped
    pub fn destroy(&mut self) {
        self.probe_buffer.release();
        self.light_buffer.release();
        self.shadow_buffer.release();
        debug!("Light registry buffers released");
    }

    pub fn is_destroyed(&self) -> bool {
        self.light_buffer.is_released()
    }

    // ========================================================================
    // Probes
    // ========================================================================

    pub fn add_probe(&mut self, mut probe: Probe) -> ProbeId {
        let id = ProbeId::new(self.next_probe, 0);
        self.next_probe += 1;
        probe.id = id;
        self.probes.insert(id, probe);
        id
    }

    pub fn remove_probe(&mut self, id: ProbeId) -> RenderResult<Probe> {
        self.probes.remove(&id).ok_or(RenderError::UnknownProbe(id))
    }

    pub fn probe(&self, id: ProbeId) -> Option<&Probe> {
        self.probes.get(&id)
    }

    pub fn probe_mut(&mut self, id: ProbeId) -> Option<&mut Probe> {
        self.probes.get_mut(&id)
    }

    pub fn probes(&self) -> impl Iterator<Item = &Probe> {
        self.probes.values()
    }

    // ========================================================================
    // Access and mutation
    // ========================================================================

    pub fn light(&self, id: LightId) -> Option<&LightSource> {
        self.lights.get(&id)
    }

    /// Mutating handle; every effective change marks the light dirty
    pub fn light_mut(&mut self, id: LightId) -> Option<LightMut<'_>> {
        let light = self.lights.get_mut(&id)?;
        Some(LightMut {
            light,
            dirty_queue: &mut self.dirty_queue,
        })
    }

    /// Registered lights in registration order
    pub fn lights(&self) -> impl Iterator<Item = &LightSource> {
        self.lights.values()
    }

    /// Active lights in activation order
    pub fn active_lights(&self) -> &[LightId] {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn light_state(&self, id: LightId) -> Option<LightState> {
        let light = self.lights.get(&id)?;
        let state = if !self.active.contains(&id) {
            LightState::Inactive
        } else if !light.shadow.enabled {
            LightState::NoShadow
        } else if light.shadow_current && !light.in_update_queue {
            LightState::ShadowCurrent
        } else {
            LightState::ShadowPending
        };
        Some(state)
    }

    /// Record that a drawable moved, appeared or disappeared
    pub fn notify_drawable_moved(&mut self, id: DrawableId, previous: Option<Aabb>, current: Option<Aabb>) {
        self.drawable_updates.push(DrawableUpdate { id, previous, current });
    }

    pub fn pending_drawable_updates(&self) -> usize {
        self.drawable_updates.len()
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn on_active_lights_changed(&mut self, listener: impl FnMut(&[LightId]) + Send + 'static) {
        self.listeners.active_changed.push(Box::new(listener));
    }

    pub fn on_light_updated(&mut self, listener: impl FnMut(&LightSource) + Send + 'static) {
        self.listeners.updated.push(Box::new(listener));
    }

    pub fn on_shadow_map_changed(&mut self, listener: impl FnMut(LightId, Option<&ShadowAllocation>) + Send + 'static) {
        self.listeners.shadow_map_changed.push(Box::new(listener));
    }

    // ========================================================================
    // Shadow queue
    // ========================================================================

    pub fn shadow_queue_len(&self) -> usize {
        self.shadow_queue.len()
    }

    pub fn shadow_queue(&self) -> impl Iterator<Item = LightId> + '_ {
        self.shadow_queue.iter().copied()
    }

    pub fn is_queued_for_shadow(&self, id: LightId) -> bool {
        self.lights.get(&id).map_or(false, |l| l.in_update_queue)
    }

    /// Next light to draw; its flag stays set until `complete_shadow_update`
    pub fn pop_shadow_update(&mut self) -> Option<LightId> {
        self.shadow_queue.pop_front()
    }

    /// Clear the queued flag of a drained light
    ///
    /// This is the only place the flag is reset.
    pub fn complete_shadow_update(&mut self, id: LightId, outcome: ShadowUpdateOutcome) {
        let Some(light) = self.lights.get_mut(&id) else {
            return;
        };
        light.in_update_queue = false;
        match outcome {
            ShadowUpdateOutcome::Rendered => light.shadow_current = true,
            ShadowUpdateOutcome::Dropped => light.shadow_current = false,
            ShadowUpdateOutcome::Skipped => {
                light.shadow_current = false;
                mark_dirty(light, &mut self.dirty_queue);
            }
        }
    }

    // ========================================================================
    // Per-frame update
    // ========================================================================

    /// Per-frame entry point, see the module docs for the step order
    pub fn update(&mut self, atlas: &mut ShadowAtlas, camera: &Camera) -> LightUpdateStats {
        self.frame += 1;
        let mut stats = LightUpdateStats::default();

        self.drain_dirty(atlas, camera, &mut stats);
        self.revalidate_drawables(&mut stats);
        self.requeue_by_cadence(atlas, camera, &mut stats);

        if let Err(e) = self.rebuild_buffers(atlas, camera, &mut stats) {
            warn!("Light buffer rebuild skipped: {}", e);
        }

        if stats.dirty_processed > 0 || stats.activated > 0 || stats.deactivated > 0 {
            debug!(
                "Light update frame {}: {} dirty, +{} / -{} active, {} queued for shadows",
                self.frame,
                stats.dirty_processed,
                stats.activated,
                stats.deactivated,
                self.shadow_queue.len()
            );
        }

        self.stats = stats.clone();
        stats
    }

    pub fn stats(&self) -> &LightUpdateStats {
        &self.stats
    }

    fn drain_dirty(&mut self, atlas: &mut ShadowAtlas, camera: &Camera, stats: &mut LightUpdateStats) {
        let Self {
            config,
            lights,
            active,
            dirty_queue,
            shadow_queue,
            starved,
            listeners,
            ..
        } = self;

        // releases first, so allocations later in the queue can reuse the space
        for id in dirty_queue.iter() {
            let Some(light) = lights.get_mut(id) else {
                continue;
            };
            if light.enabled && !light.shadow.enabled && atlas.release(*id) {
                light.shadow_current = false;
                listeners.shadow_map_changed(*id, None);
            }
        }

        while let Some(id) = dirty_queue.pop_front() {
            let Some(light) = lights.get_mut(&id) else {
                continue;
            };
            light.dirty = false;
            stats.dirty_processed += 1;

            if light.enabled {
                if !active.contains(&id) {
                    active.push(id);
                    stats.activated += 1;
                    trace!("Light {:?} activated", id);
                    listeners.active_changed(active);
                }

                if light.shadow.enabled {
                    if ensure_shadow_map(light, atlas, camera, config, starved, listeners).is_err() {
                        stats.allocation_failures += 1;
                    }
                    enqueue_shadow(light, shadow_queue);
                }
            } else if let Some(pos) = active.iter().position(|l| *l == id) {
                // the atlas allocation survives: disable and shadow destruction are separate
                active.remove(pos);
                light.queue_index = None;
                stats.deactivated += 1;
                trace!("Light {:?} deactivated", id);
                listeners.active_changed(active);
            }

            listeners.updated(light);
        }
    }

    fn revalidate_drawables(&mut self, stats: &mut LightUpdateStats) {
        let Self {
            lights,
            active,
            shadow_queue,
            drawable_updates,
            ..
        } = self;

        for update in drawable_updates.drain(..) {
            for id in active.iter() {
                let Some(light) = lights.get_mut(id) else {
                    continue;
                };
                if !light.shadow.enabled || !light.is_on_demand() || light.in_update_queue {
                    continue;
                }
                let hit = [update.previous, update.current]
                    .iter()
                    .flatten()
                    .any(|bounds| light.intersects_shadow_volume(bounds));
                if hit {
                    trace!("Light {:?} invalidated by {:?}", id, update.id);
                    enqueue_shadow(light, shadow_queue);
                    stats.drawable_requeued += 1;
                }
            }
        }
    }

    fn requeue_by_cadence(&mut self, atlas: &mut ShadowAtlas, camera: &Camera, stats: &mut LightUpdateStats) {
        let Self {
            config,
            lights,
            active,
            shadow_queue,
            starved,
            listeners,
            ..
        } = self;

        for id in active.iter() {
            let Some(light) = lights.get_mut(id) else {
                continue;
            };
            if !light.shadow.enabled || light.in_update_queue {
                continue;
            }

            let due = matches!(light.variant, LightVariant::Directional { .. })
                || light.shadow.update_mode == ShadowMapUpdateMode::EveryFrame
                || update_shadow_map_size(light, atlas, camera, config, starved, listeners);

            if due {
                enqueue_shadow(light, shadow_queue);
                stats.cadence_requeued += 1;
            }
        }
    }

    fn rebuild_buffers(&mut self, atlas: &ShadowAtlas, camera: &Camera, stats: &mut LightUpdateStats) -> RenderResult<()> {
        let Self {
            config,
            lights,
            probes,
            active,
            light_buffer,
            shadow_buffer,
            probe_buffer,
            ..
        } = self;

        if light_buffer.is_released() {
            return Err(RenderError::BufferReleased(light_buffer.label()));
        }

        light_buffer.reset_counter();
        shadow_buffer.reset_counter();
        probe_buffer.reset_counter();

        for id in active.iter() {
            let Some(light) = lights.get_mut(id) else {
                continue;
            };
            let mut gpu = light.to_gpu();
            if light.shadow.enabled {
                let data = light.gpu_shadow_data(camera, config, atlas.get(*id), atlas.size());
                let index = shadow_buffer.try_push(data)?;
                gpu.shadow_index = index as i32;
                light_buffer.try_push(gpu)?;
                light.queue_index = Some(index);
                stats.shadow_lights += 1;
            } else {
                let index = light_buffer.try_push(gpu)?;
                light.queue_index = Some(index);
            }
            stats.lights += 1;
        }

        for probe in probes.values().filter(|p| p.enabled) {
            probe_buffer.try_push(probe.to_gpu())?;
            stats.probes += 1;
        }

        Ok(())
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    pub fn light_buffer(&self) -> &StructuredBuffer<GpuLight> {
        &self.light_buffer
    }

    pub fn shadow_buffer(&self) -> &StructuredBuffer<GpuShadowData> {
        &self.shadow_buffer
    }

    pub fn probe_buffer(&self) -> &StructuredBuffer<GpuProbe> {
        &self.probe_buffer
    }
}

impl Default for LightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn mark_dirty(light: &mut LightSource, dirty_queue: &mut VecDeque<LightId>) {
    if !light.dirty {
        light.dirty = true;
        dirty_queue.push_back(light.id);
    }
}

fn enqueue_shadow(light: &mut LightSource, shadow_queue: &mut VecDeque<LightId>) {
    if !light.in_update_queue {
        light.in_update_queue = true;
        shadow_queue.push_back(light.id);
    }
}

/// Allocate or reshape the light's atlas regions for the current footprint
///
/// Returns true when the light's regions changed. A failure is logged once
/// per starvation episode.
fn ensure_shadow_map(
    light: &mut LightSource,
    atlas: &mut ShadowAtlas,
    camera: &Camera,
    config: &ShadowConfig,
    starved: &mut BTreeSet<LightId>,
    listeners: &mut Listeners,
) -> RenderResult<bool> {
    let size = light.desired_shadow_size(camera, config, atlas);
    let count = light.shadow_region_count(config);
    let before = atlas.get(light.id).cloned();

    match atlas.allocate(light.id, size, count) {
        Ok(allocation) => {
            if starved.remove(&light.id) {
                debug!("Light {:?} shadow map allocated after starvation", light.id);
            }
            let changed = before.as_ref().map(|b| b.regions()) != Some(allocation.regions());
            if changed {
                trace!("Light {:?} shadow map {}px x{}", light.id, allocation.size, allocation.region_count());
                light.shadow_current = false;
                listeners.shadow_map_changed(light.id, Some(&allocation));
            }
            Ok(changed)
        }
        Err(e) => {
            if starved.insert(light.id) {
                warn!("Shadow map for light {:?} '{}' not allocated: {}", light.id, light.name, e);
            }
            let after = atlas.get(light.id).cloned();
            if before != after {
                listeners.shadow_map_changed(light.id, after.as_ref());
            }
            Err(e)
        }
    }
}

/// Footprint LOD test; true when the shadow map was resized or newly placed
fn update_shadow_map_size(
    light: &mut LightSource,
    atlas: &mut ShadowAtlas,
    camera: &Camera,
    config: &ShadowConfig,
    starved: &mut BTreeSet<LightId>,
    listeners: &mut Listeners,
) -> bool {
    let size = light.desired_shadow_size(camera, config, atlas);
    let count = light.shadow_region_count(config) as usize;
    let unchanged = atlas
        .get(light.id)
        .map_or(false, |current| current.size == size && current.region_count() == count);
    if unchanged {
        return false;
    }
    matches!(ensure_shadow_map(light, atlas, camera, config, starved, listeners), Ok(true))
}

/// Mutating access to a registered light
///
/// Every setter that changes a value marks the light dirty.
pub struct LightMut<'a> {
    light: &'a mut LightSource,
    dirty_queue: &'a mut VecDeque<LightId>,
}

impl<'a> LightMut<'a> {
    pub fn get(&self) -> &LightSource {
        self.light
    }

    /// Queue the light for reprocessing without changing it
    pub fn mark_dirty(&mut self) {
        mark_dirty(self.light, self.dirty_queue);
    }

    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        if self.light.enabled != enabled {
            self.light.enabled = enabled;
            self.mark_dirty();
        }
        self
    }

    pub fn set_position(&mut self, position: Vec3) -> &mut Self {
        if self.light.position != position {
            self.light.position = position;
            self.mark_dirty();
        }
        self
    }

    pub fn set_rotation(&mut self, rotation: Quat) -> &mut Self {
        if self.light.rotation != rotation {
            self.light.rotation = rotation;
            self.mark_dirty();
        }
        self
    }

    pub fn set_color(&mut self, color: Vec3) -> &mut Self {
        if self.light.color != color {
            self.light.color = color;
            self.mark_dirty();
        }
        self
    }

    pub fn set_intensity(&mut self, intensity: f32) -> &mut Self {
        if self.light.intensity != intensity {
            self.light.intensity = intensity;
            self.mark_dirty();
        }
        self
    }

    pub fn set_shadow_enabled(&mut self, enabled: bool) -> &mut Self {
        if self.light.shadow.enabled != enabled {
            self.light.shadow.enabled = enabled;
            self.mark_dirty();
        }
        self
    }

    pub fn set_shadow_update_mode(&mut self, mode: ShadowMapUpdateMode) -> &mut Self {
        if self.light.shadow.update_mode != mode {
            self.light.shadow.update_mode = mode;
            self.mark_dirty();
        }
        self
    }

    pub fn set_shadow_size(&mut self, size: u32) -> &mut Self {
        let size = round_shadow_size(size);
        if self.light.shadow.size != size {
            self.light.shadow.size = size;
            self.mark_dirty();
        }
        self
    }

    /// Change point/spot range; no effect on directional lights
    pub fn set_range(&mut self, range: f32) -> &mut Self {
        let changed = match &mut self.light.variant {
            LightVariant::Directional { .. } => false,
            LightVariant::Point { range: r } | LightVariant::Spot { range: r, .. } => {
                let changed = *r != range;
                *r = range;
                changed
            }
        };
        if changed {
            self.mark_dirty();
        }
        self
    }

    /// Replace the variant parameters; the light type must stay the same
    pub fn set_variant(&mut self, variant: LightVariant) -> RenderResult<&mut Self> {
        let from = self.light.light_type();
        let to = variant.light_type();
        if from != to {
            return Err(RenderError::LightTypeChange {
                light: self.light.id,
                from,
                to,
            });
        }
        if self.light.variant != variant {
            self.light.variant = variant;
            self.mark_dirty();
        }
        Ok(self)
    }
}
