//! Render Manager
//!
//! Owns the renderer components of a scene, classifies them into queue
//! buckets and keeps the BVH the shadow pass queries.
//!
//! Buckets stay sorted by `(queue_index, registration sequence)` at all
//! times, so drawing is a straight walk over each selected bucket.

use log::trace;
use penumbra_math::Aabb;
use serde::{Deserialize, Serialize};

use crate::backend::{GraphicsContext, RenderPath};
use crate::error::{RenderError, RenderResult};
use crate::id::DrawableId;
use crate::light::LightRegistry;
use crate::queue::component::{CullingContext, RendererComponent};
use crate::queue::flags::RendererFlags;
use crate::queue::index::{QueueMask, RenderQueueBucket};
use crate::spatial::BvhTree;

const BUCKET_COUNT: usize = 6;

/// A registered renderer component and its classification
pub struct Drawable {
    id: DrawableId,
    pub(crate) component: Box<dyn RendererComponent>,
    queue_index: u32,
    bounds: Aabb,
    sequence: u64,
    /// Result of the last visibility test
    visible: bool,
}

impl Drawable {
    pub fn id(&self) -> DrawableId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    pub fn component(&self) -> &dyn RendererComponent {
        self.component.as_ref()
    }

    pub fn component_mut(&mut self) -> &mut dyn RendererComponent {
        self.component.as_mut()
    }

    pub fn flags(&self) -> RendererFlags {
        self.component.flags()
    }

    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    pub fn bucket(&self) -> RenderQueueBucket {
        RenderQueueBucket::from_queue_index(self.queue_index)
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    fn sort_key(&self) -> (u32, u64) {
        (self.queue_index, self.sequence)
    }
}

struct Slot {
    generation: u32,
    drawable: Option<Drawable>,
}

/// Render queue statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderQueueStats {
    pub drawables: u32,
    pub bucket_sizes: [u32; BUCKET_COUNT],
    pub draws: u64,
    pub depth_draws: u64,
    pub visible: u32,
    pub culled: u32,
    pub bvh_rebuilds: u64,
    pub bvh_refits: u64,
}

/// Render queue classifier and drawable owner
pub struct RenderManager {
    slots: Vec<Slot>,
    free: Vec<u32>,
    buckets: [Vec<DrawableId>; BUCKET_COUNT],
    bvh: BvhTree,
    bvh_dirty: bool,
    build_items: Vec<(u32, Aabb)>,
    next_sequence: u64,
    len: usize,
    stats: RenderQueueStats,
}

impl RenderManager {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: Default::default(),
            bvh: BvhTree::new(),
            bvh_dirty: false,
            build_items: Vec::new(),
            next_sequence: 0,
            len: 0,
            stats: RenderQueueStats::default(),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a component in the bucket of its queue index
    pub fn add(&mut self, component: Box<dyn RendererComponent>) -> DrawableId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    drawable: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = DrawableId::new(index, slot.generation);
        trace!("Drawable {:?} '{}' added at queue {}", id, component.name(), component.queue_index());
        slot.drawable = Some(Drawable {
            id,
            queue_index: component.queue_index(),
            bounds: component.bounds(),
            component,
            sequence: self.next_sequence,
            visible: true,
        });

        self.next_sequence += 1;
        self.len += 1;
        self.insert_sorted(id);
        self.bvh_dirty = true;
        self.refresh_counts();
        id
    }

    /// Unregister a component and rebuild the hierarchy without it
    pub fn remove(&mut self, id: DrawableId) -> RenderResult<Box<dyn RendererComponent>> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .ok_or(RenderError::UnknownDrawable(id))?;
        let drawable = slot.drawable.take().ok_or(RenderError::UnknownDrawable(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());

        self.buckets[drawable.bucket().index()].retain(|d| *d != id);
        self.len -= 1;
        self.rebuild_bvh();
        self.refresh_counts();
        trace!("Drawable {:?} '{}' removed", id, drawable.name());
        Ok(drawable.component)
    }

    /// Reclassify a drawable; returns false if the index did not change
    pub fn set_queue_index(&mut self, id: DrawableId, queue_index: u32) -> RenderResult<bool> {
        let drawable = self.get_mut(id).ok_or(RenderError::UnknownDrawable(id))?;
        let old = drawable.bucket();
        if drawable.queue_index == queue_index {
            return Ok(false);
        }

        drawable.queue_index = queue_index;
        drawable.visible = true;
        self.buckets[old.index()].retain(|d| *d != id);
        self.insert_sorted(id);
        self.refresh_counts();
        Ok(true)
    }

    /// Move a drawable and invalidate the lights whose volumes it touches
    pub fn set_bounds(&mut self, id: DrawableId, bounds: Aabb, lights: &mut LightRegistry) -> RenderResult<()> {
        let drawable = self.get_mut(id).ok_or(RenderError::UnknownDrawable(id))?;
        let previous = drawable.bounds;
        if previous == bounds {
            return Ok(());
        }
        drawable.bounds = bounds;

        if !self.bvh_dirty {
            if self.bvh.refit(id.index(), bounds) {
                self.stats.bvh_refits += 1;
            } else {
                self.bvh_dirty = true;
            }
        }

        lights.notify_drawable_moved(id, Some(previous), Some(bounds));
        Ok(())
    }

    /// Rebuild the hierarchy if registrations changed; returns true if rebuilt
    pub fn update(&mut self) -> bool {
        if !self.bvh_dirty {
            return false;
        }
        self.rebuild_bvh();
        true
    }

    // ========================================================================
    // Drawing
    // ========================================================================

    /// Draw the selected buckets in bucket order, then sorted order
    pub fn draw(&mut self, mask: QueueMask, ctx: &mut dyn GraphicsContext, path: RenderPath) -> u32 {
        let mut draws = 0;
        for bucket in mask.buckets() {
            let Self { slots, buckets, .. } = self;
            for id in &buckets[bucket.index()] {
                let Some(drawable) = slot_drawable_mut(slots, *id) else {
                    continue;
                };
                if !drawable.flags().contains(RendererFlags::DRAW) || !drawable.visible {
                    continue;
                }
                drawable.component.draw(ctx, path);
                draws += 1;
            }
        }
        self.stats.draws += draws as u64;
        draws
    }

    /// Depth prepass over the selected buckets
    pub fn draw_depth(&mut self, mask: QueueMask, ctx: &mut dyn GraphicsContext) -> u32 {
        let mut draws = 0;
        for bucket in mask.buckets() {
            let Self { slots, buckets, .. } = self;
            for id in &buckets[bucket.index()] {
                let Some(drawable) = slot_drawable_mut(slots, *id) else {
                    continue;
                };
                if !drawable.flags().contains(RendererFlags::DRAW_DEPTH) || !drawable.visible {
                    continue;
                }
                drawable.component.draw_depth(ctx);
                draws += 1;
            }
        }
        self.stats.depth_draws += draws as u64;
        draws
    }

    /// Cull the Geometry bucket; other buckets are never culled
    ///
    /// Returns the number of culled drawables.
    pub fn visibility_test(&mut self, culling: &CullingContext) -> u32 {
        let Self { slots, buckets, .. } = self;
        let mut visible = 0;
        let mut culled = 0;

        for id in &buckets[RenderQueueBucket::Geometry.index()] {
            let Some(drawable) = slot_drawable_mut(slots, *id) else {
                continue;
            };
            drawable.visible = !drawable.flags().contains(RendererFlags::CULLABLE)
                || drawable.component.visibility_test(culling, &drawable.bounds);
            if drawable.visible {
                visible += 1;
            } else {
                culled += 1;
            }
        }

        self.stats.visible = visible;
        self.stats.culled = culled;
        culled
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn bucket(&self, bucket: RenderQueueBucket) -> &[DrawableId] {
        &self.buckets[bucket.index()]
    }

    pub fn bucket_of(&self, id: DrawableId) -> Option<RenderQueueBucket> {
        self.get(id).map(Drawable::bucket)
    }

    pub fn drawable(&self, id: DrawableId) -> Option<&Drawable> {
        self.get(id)
    }

    pub fn drawable_mut(&mut self, id: DrawableId) -> Option<&mut Drawable> {
        self.get_mut(id)
    }

    /// Drawable behind a BVH leaf's `object_index`
    pub fn drawable_at(&self, index: u32) -> Option<&Drawable> {
        self.slots.get(index as usize).and_then(|slot| slot.drawable.as_ref())
    }

    pub(crate) fn drawable_at_mut(&mut self, index: u32) -> Option<&mut Drawable> {
        self.slots.get_mut(index as usize).and_then(|slot| slot.drawable.as_mut())
    }

    pub fn drawables(&self) -> impl Iterator<Item = &Drawable> {
        self.slots.iter().filter_map(|slot| slot.drawable.as_ref())
    }

    pub fn bvh(&self) -> &BvhTree {
        &self.bvh
    }

    pub fn is_bvh_dirty(&self) -> bool {
        self.bvh_dirty
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stats(&self) -> &RenderQueueStats {
        &self.stats
    }

    fn get(&self, id: DrawableId) -> Option<&Drawable> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.drawable.as_ref())
    }

    fn get_mut(&mut self, id: DrawableId) -> Option<&mut Drawable> {
        slot_drawable_mut(&mut self.slots, id)
    }

    fn insert_sorted(&mut self, id: DrawableId) {
        let Some(drawable) = self.get(id) else {
            return;
        };
        let key = drawable.sort_key();
        let bucket = drawable.bucket();

        let slots = &self.slots;
        let list = &mut self.buckets[bucket.index()];
        let position = list.partition_point(|other| {
            slots
                .get(other.index() as usize)
                .and_then(|slot| slot.drawable.as_ref())
                .map_or(true, |d| d.sort_key() <= key)
        });
        list.insert(position, id);
    }

    fn rebuild_bvh(&mut self) {
        self.build_items.clear();
        self.build_items.extend(
            self.slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| slot.drawable.as_ref().map(|d| (index as u32, d.bounds))),
        );
        self.bvh.build(&self.build_items);
        self.bvh_dirty = false;
        self.stats.bvh_rebuilds += 1;
        trace!("BVH rebuilt over {} drawables", self.build_items.len());
    }

    fn refresh_counts(&mut self) {
        self.stats.drawables = self.len as u32;
        for (size, bucket) in self.stats.bucket_sizes.iter_mut().zip(&self.buckets) {
            *size = bucket.len() as u32;
        }
    }
}

impl Default for RenderManager {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_drawable_mut(slots: &mut [Slot], id: DrawableId) -> Option<&mut Drawable> {
    slots
        .get_mut(id.index() as usize)
        .filter(|slot| slot.generation == id.generation())
        .and_then(|slot| slot.drawable.as_mut())
}
