//! Shadow Atlas Allocation
//!
//! Backend-agnostic bookkeeping for the shared shadow atlas. This module
//! decides where each light's shadow map lives; it creates no GPU resources.
//!
//! # Atlas Organization
//!
//! The atlas is one square texture subdivided as a quadtree: a free block
//! of size `s` splits into four blocks of `s / 2`, and four free siblings
//! merge back into their parent. Every region is a power-of-two square no
//! smaller than `min_region_size`.
//!
//! A light owns between one and four regions of the same size: one per
//! cascade for directional lights, one per hemisphere for point lights and
//! a single one for spot lights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::Viewport;
use crate::error::{RenderError, RenderResult};
use crate::id::LightId;

/// Most regions one light can own
pub const MAX_REGIONS_PER_LIGHT: usize = 4;

/// Atlas dimensions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Width and height in texels (power of 2)
    pub size: u32,
    /// Smallest allocatable region (power of 2)
    pub min_region_size: u32,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            size: 8192,
            min_region_size: 128,
        }
    }
}

impl AtlasConfig {
    /// Clamp values to valid ranges
    pub fn validate(&mut self) {
        self.size = self.size.clamp(256, 16384).next_power_of_two();
        self.min_region_size = self.min_region_size.clamp(16, self.size).next_power_of_two();
    }
}

/// A square region of the atlas in texels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtlasRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl AtlasRegion {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.x as f32, self.y as f32, self.size as f32, self.size as f32)
    }

    /// Normalized `[u, v, width, height]` inside an atlas of `atlas_size`
    pub fn uv_rect(&self, atlas_size: u32) -> [f32; 4] {
        let inv = 1.0 / atlas_size.max(1) as f32;
        [
            self.x as f32 * inv,
            self.y as f32 * inv,
            self.size as f32 * inv,
            self.size as f32 * inv,
        ]
    }

    pub fn overlaps(&self, other: &AtlasRegion) -> bool {
        self.x < other.x + other.size
            && other.x < self.x + self.size
            && self.y < other.y + other.size
            && other.y < self.y + self.size
    }
}

/// Regions owned by one light
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowAllocation {
    pub light_id: LightId,
    /// Edge length of every region
    pub size: u32,
    regions: [AtlasRegion; MAX_REGIONS_PER_LIGHT],
    region_count: u32,
    /// Frame the allocation was created
    pub first_frame: u64,
    /// Last frame the allocation was requested
    pub last_frame: u64,
}

impl ShadowAllocation {
    pub fn regions(&self) -> &[AtlasRegion] {
        &self.regions[..self.region_count as usize]
    }

    pub fn region(&self, index: usize) -> Option<&AtlasRegion> {
        self.regions().get(index)
    }

    pub fn region_count(&self) -> usize {
        self.region_count as usize
    }
}

/// Atlas statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AtlasStats {
    pub allocations_this_frame: u32,
    pub releases_this_frame: u32,
    pub failures_this_frame: u32,
    pub total_allocations: u64,
    pub total_failures: u64,
}

/// Shadow atlas allocation manager
#[derive(Clone, Debug)]
pub struct ShadowAtlas {
    config: AtlasConfig,
    /// Free blocks per quadtree level; level 0 is the whole atlas
    free: Vec<Vec<(u32, u32)>>,
    allocations: BTreeMap<LightId, ShadowAllocation>,
    used_texels: u64,
    frame: u64,
    stats: AtlasStats,
}

impl ShadowAtlas {
    pub fn new(mut config: AtlasConfig) -> Self {
        config.validate();
        let levels = (config.size / config.min_region_size).trailing_zeros() as usize + 1;
        let mut free = vec![Vec::new(); levels];
        free[0].push((0, 0));

        Self {
            config,
            free,
            allocations: BTreeMap::new(),
            used_texels: 0,
            frame: 0,
            stats: AtlasStats::default(),
        }
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn size(&self) -> u32 {
        self.config.size
    }

    /// Begin a new frame
    pub fn begin_frame(&mut self) {
        self.frame += 1;
        self.stats.allocations_this_frame = 0;
        self.stats.releases_this_frame = 0;
        self.stats.failures_this_frame = 0;
    }

    /// Round a requested edge length to a size the atlas can hand out
    pub fn clamp_size(&self, size: u32) -> u32 {
        size.clamp(self.config.min_region_size, self.config.size).next_power_of_two()
    }

    /// Ensure `light_id` owns `count` regions of `size`
    ///
    /// An existing allocation with the same shape is reused. A reshape keeps
    /// the old regions when the new shape does not fit.
    pub fn allocate(&mut self, light_id: LightId, size: u32, count: u32) -> RenderResult<ShadowAllocation> {
        if size == 0 || count == 0 || count as usize > MAX_REGIONS_PER_LIGHT {
            return Err(RenderError::InvalidAllocationSize(size));
        }
        let size = self.clamp_size(size);
        let level = self.level_for(size);

        if let Some(existing) = self.allocations.get_mut(&light_id) {
            if existing.size == size && existing.region_count == count {
                existing.last_frame = self.frame;
                return Ok(existing.clone());
            }
        }

        // New shape alongside the old one first, so failure leaves the old shape intact
        let regions = match self.take_blocks(level, count) {
            Some(regions) => {
                self.release(light_id);
                regions
            }
            None => {
                let Some(previous) = self.allocations.get(&light_id).cloned() else {
                    return Err(self.exhausted(light_id, size, count));
                };
                self.release(light_id);
                match self.take_blocks(level, count) {
                    Some(regions) => regions,
                    None => {
                        let old_level = self.level_for(previous.size);
                        if let Some(restored) = self.take_blocks(old_level, previous.region_count) {
                            self.insert(light_id, previous.size, restored);
                        }
                        return Err(self.exhausted(light_id, size, count));
                    }
                }
            }
        };

        Ok(self.insert(light_id, size, regions))
    }

    /// Release a light's regions, returns true if it had any
    pub fn release(&mut self, light_id: LightId) -> bool {
        let Some(allocation) = self.allocations.remove(&light_id) else {
            return false;
        };
        let level = self.level_for(allocation.size);
        for region in allocation.regions() {
            self.free_block(level, region.x, region.y);
        }
        self.used_texels -= allocation.size as u64 * allocation.size as u64 * allocation.region_count as u64;
        self.stats.releases_this_frame += 1;
        true
    }

    /// Release every allocation
    pub fn clear(&mut self) {
        let ids: Vec<LightId> = self.allocations.keys().copied().collect();
        for id in ids {
            self.release(id);
        }
    }

    pub fn get(&self, light_id: LightId) -> Option<&ShadowAllocation> {
        self.allocations.get(&light_id)
    }

    pub fn contains(&self, light_id: LightId) -> bool {
        self.allocations.contains_key(&light_id)
    }

    pub fn allocated_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn allocations(&self) -> impl Iterator<Item = &ShadowAllocation> {
        self.allocations.values()
    }

    /// Fraction of atlas texels in use (0-1)
    pub fn utilization(&self) -> f32 {
        let total = self.config.size as u64 * self.config.size as u64;
        self.used_texels as f32 / total as f32
    }

    pub fn stats(&self) -> &AtlasStats {
        &self.stats
    }

    fn level_for(&self, size: u32) -> usize {
        (self.config.size / size).trailing_zeros() as usize
    }

    fn block_size(&self, level: usize) -> u32 {
        self.config.size >> level
    }

    fn insert(&mut self, light_id: LightId, size: u32, regions: Vec<AtlasRegion>) -> ShadowAllocation {
        let mut packed = [AtlasRegion::default(); MAX_REGIONS_PER_LIGHT];
        for (dst, src) in packed.iter_mut().zip(&regions) {
            *dst = *src;
        }
        let allocation = ShadowAllocation {
            light_id,
            size,
            regions: packed,
            region_count: regions.len() as u32,
            first_frame: self.frame,
            last_frame: self.frame,
        };
        self.used_texels += size as u64 * size as u64 * regions.len() as u64;
        self.stats.allocations_this_frame += 1;
        self.stats.total_allocations += 1;
        self.allocations.insert(light_id, allocation.clone());
        allocation
    }

    fn exhausted(&mut self, light: LightId, size: u32, regions: u32) -> RenderError {
        self.stats.failures_this_frame += 1;
        self.stats.total_failures += 1;
        RenderError::AtlasExhausted { light, size, regions }
    }

    /// Take `count` blocks at `level`, all or nothing
    fn take_blocks(&mut self, level: usize, count: u32) -> Option<Vec<AtlasRegion>> {
        let size = self.block_size(level);
        let mut regions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match self.alloc_block(level) {
                Some((x, y)) => regions.push(AtlasRegion { x, y, size }),
                None => {
                    for region in &regions {
                        self.free_block(level, region.x, region.y);
                    }
                    return None;
                }
            }
        }
        Some(regions)
    }

    fn alloc_block(&mut self, level: usize) -> Option<(u32, u32)> {
        if let Some(block) = self.free[level].pop() {
            return Some(block);
        }

        // Split the nearest larger free block down to `level`
        let source = (0..level).rev().find(|&l| !self.free[l].is_empty())?;
        let (x, y) = self.free[source].pop()?;
        for l in source..level {
            let half = self.block_size(l + 1);
            self.free[l + 1].push((x + half, y + half));
            self.free[l + 1].push((x, y + half));
            self.free[l + 1].push((x + half, y));
        }
        Some((x, y))
    }

    fn free_block(&mut self, mut level: usize, mut x: u32, mut y: u32) {
        while level > 0 {
            let size = self.block_size(level);
            let parent_x = x - x % (size * 2);
            let parent_y = y - y % (size * 2);
            let siblings = [
                (parent_x, parent_y),
                (parent_x + size, parent_y),
                (parent_x, parent_y + size),
                (parent_x + size, parent_y + size),
            ];

            let free = &self.free[level];
            let all_free = siblings
                .iter()
                .filter(|&&s| s != (x, y))
                .all(|s| free.contains(s));
            if !all_free {
                break;
            }

            self.free[level].retain(|s| !siblings.contains(s));
            level -= 1;
            x = parent_x;
            y = parent_y;
        }
        self.free[level].push((x, y));
    }
}

impl Default for ShadowAtlas {
    fn default() -> Self {
        Self::new(AtlasConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_atlas() -> ShadowAtlas {
        ShadowAtlas::new(AtlasConfig {
            size: 1024,
            min_region_size: 256,
        })
    }

    fn light(n: u32) -> LightId {
        LightId::new(n, 0)
    }

    #[test]
    fn test_clamp_size_bounds() {
        let atlas = small_atlas();
        assert_eq!(atlas.clamp_size(0), 256);
        assert_eq!(atlas.clamp_size(300), 512);
        assert_eq!(atlas.clamp_size(u32::MAX), 1024);
    }

    #[test]
    fn test_atlas_allocate() {
        let mut atlas = small_atlas();
        let alloc = atlas.allocate(light(1), 512, 1).unwrap();
        assert_eq!(alloc.size, 512);
        assert_eq!(alloc.region_count(), 1);
        assert!(atlas.contains(light(1)));
        assert!((atlas.utilization() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_atlas_reuse_same_shape() {
        let mut atlas = small_atlas();
        let first = atlas.allocate(light(1), 512, 2).unwrap();
        atlas.begin_frame();
        let second = atlas.allocate(light(1), 512, 2).unwrap();
        assert_eq!(first.regions(), second.regions());
        assert_eq!(atlas.stats().allocations_this_frame, 0);
    }

    #[test]
    fn test_atlas_regions_do_not_overlap() {
        let mut atlas = small_atlas();
        let a = atlas.allocate(light(1), 512, 2).unwrap();
        let b = atlas.allocate(light(2), 256, 4).unwrap();
        let c = atlas.allocate(light(3), 256, 2).unwrap();
        let all: Vec<AtlasRegion> = [a, b, c].iter().flat_map(|x| x.regions().to_vec()).collect();
        for (i, r) in all.iter().enumerate() {
            assert!(r.x + r.size <= 1024 && r.y + r.size <= 1024);
            for other in &all[i + 1..] {
                assert!(!r.overlaps(other), "{:?} overlaps {:?}", r, other);
            }
        }
    }

    #[test]
    fn test_atlas_exhaustion() {
        let mut atlas = small_atlas();
        atlas.allocate(light(1), 1024, 1).unwrap();
        let err = atlas.allocate(light(2), 256, 1).unwrap_err();
        assert!(matches!(err, RenderError::AtlasExhausted { .. }));
        assert!(!atlas.contains(light(2)));
        assert_eq!(atlas.stats().total_failures, 1);
    }

    #[test]
    fn test_atlas_all_or_nothing() {
        let mut atlas = small_atlas();
        atlas.allocate(light(1), 512, 3).unwrap();
        assert!(atlas.allocate(light(2), 512, 2).is_err());
        // the failed request must not leak the one block that did fit
        assert!(atlas.allocate(light(3), 512, 1).is_ok());
    }

    #[test]
    fn test_atlas_release_merges_blocks() {
        let mut atlas = small_atlas();
        for n in 0..16 {
            atlas.allocate(light(n), 256, 1).unwrap();
        }
        assert!(atlas.allocate(light(99), 256, 1).is_err());
        for n in 0..16 {
            assert!(atlas.release(light(n)));
        }
        assert_eq!(atlas.utilization(), 0.0);
        // only possible if every block merged back into the root
        assert!(atlas.allocate(light(100), 1024, 1).is_ok());
    }

    #[test]
    fn test_atlas_resize_keeps_old_on_failure() {
        let mut atlas = small_atlas();
        atlas.allocate(light(1), 512, 1).unwrap();
        atlas.allocate(light(2), 512, 3).unwrap();
        assert!(atlas.allocate(light(1), 1024, 1).is_err());
        let kept = atlas.get(light(1)).unwrap();
        assert_eq!(kept.size, 512);
    }

    #[test]
    fn test_atlas_resize_in_place_when_space() {
        let mut atlas = small_atlas();
        atlas.allocate(light(1), 256, 1).unwrap();
        let grown = atlas.allocate(light(1), 512, 1).unwrap();
        assert_eq!(grown.size, 512);
        assert!((atlas.utilization() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_atlas_clamps_sizes() {
        let atlas = small_atlas();
        assert_eq!(atlas.clamp_size(10), 256);
        assert_eq!(atlas.clamp_size(300), 512);
        assert_eq!(atlas.clamp_size(100_000), 1024);
    }

    #[test]
    fn test_atlas_invalid_requests() {
        let mut atlas = small_atlas();
        assert!(atlas.allocate(light(1), 0, 1).is_err());
        assert!(atlas.allocate(light(1), 256, 5).is_err());
    }

    #[test]
    fn test_atlas_clear() {
        let mut atlas = small_atlas();
        atlas.allocate(light(1), 256, 1).unwrap();
        atlas.allocate(light(2), 512, 2).unwrap();
        atlas.clear();
        assert_eq!(atlas.allocated_count(), 0);
        assert!(atlas.allocate(light(3), 1024, 1).is_ok());
    }

    #[test]
    fn test_region_uv_rect() {
        let region = AtlasRegion { x: 512, y: 256, size: 256 };
        assert_eq!(region.uv_rect(1024), [0.5, 0.25, 0.25, 0.25]);
    }
}
