//! Renderer Flags
//!
//! Flags indicating which passes a renderer component takes part in.

use serde::{Deserialize, Serialize};

/// Flags indicating which passes a renderer component takes part in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RendererFlags(u32);

impl RendererFlags {
    /// No passes
    pub const NONE: Self = Self(0);

    /// Main color / G-buffer pass
    pub const DRAW: Self = Self(1 << 0);

    /// Depth prepass
    pub const DRAW_DEPTH: Self = Self(1 << 1);

    /// Shadow map passes
    pub const CAST_SHADOWS: Self = Self(1 << 2);

    /// Subject to camera visibility tests
    pub const CULLABLE: Self = Self(1 << 3);

    /// Opaque mesh defaults
    pub const DEFAULT: Self = Self(Self::DRAW.0 | Self::DRAW_DEPTH.0 | Self::CAST_SHADOWS.0 | Self::CULLABLE.0);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if all specified flags are set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if any of the specified flags are set
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Set flags based on condition
    #[inline]
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// Builder form of [`set`](Self::set)
    #[inline]
    pub fn with(mut self, other: Self, value: bool) -> Self {
        self.set(other, value);
        self
    }
}

impl core::ops::BitOr for RendererFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
