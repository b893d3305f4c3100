//! GPU Light Buffer Management
//!
//! GPU-ready light, probe and shadow records plus the append-only
//! structured buffer they are packed into every frame.
//!
//! # Index stability
//!
//! A buffer is reset once per frame and appended to in active-set order.
//! The index returned by [`StructuredBuffer::try_push`] is what shaders use
//! to find a record, so it stays valid until the next reset.

use bytemuck::Pod;

use crate::error::{RenderError, RenderResult};

/// GPU-ready light data
///
/// Matches the shader struct layout; one record per active light.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    /// World-space position
    pub position: [f32; 3],
    /// Influence radius (0 for directional lights)
    pub range: f32,
    /// Normalized forward direction
    pub direction: [f32; 3],
    /// `LightType` discriminant
    pub light_type: u32,
    /// Linear RGB
    pub color: [f32; 3],
    pub intensity: f32,
    /// Cosine of the inner cone angle (spot lights)
    pub cos_inner: f32,
    /// Cosine of the outer cone angle (spot lights)
    pub cos_outer: f32,
    /// Index into the shadow buffer (-1 if no shadows)
    pub shadow_index: i32,
    pub _pad: u32,
}

/// GPU-ready light probe data
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuProbe {
    pub position: [f32; 3],
    pub extent: f32,
    pub intensity: f32,
    pub _pad: [f32; 3],
}

/// Append-only, per-frame-reset structured buffer
#[derive(Clone, Debug)]
pub struct StructuredBuffer<T: Pod> {
    label: &'static str,
    items: Vec<T>,
    released: bool,
    /// Incremented on every reset
    version: u64,
}

impl<T: Pod> StructuredBuffer<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            items: Vec::new(),
            released: false,
            version: 0,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Forget last frame's contents, keeping capacity
    pub fn reset_counter(&mut self) {
        self.items.clear();
        self.version += 1;
    }

    /// Append a record and return its index
    pub fn try_push(&mut self, item: T) -> RenderResult<u32> {
        if self.released {
            return Err(RenderError::BufferReleased(self.label));
        }
        let index = self.items.len() as u32;
        self.items.push(item);
        Ok(index)
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.items.get(index as usize)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Raw bytes for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.items)
    }

    pub fn count(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Drop storage; later pushes fail
    pub fn release(&mut self) {
        self.items = Vec::new();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
