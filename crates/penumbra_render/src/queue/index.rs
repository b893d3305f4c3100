//! Render queue indices, buckets and bucket masks

use serde::{Deserialize, Serialize};

/// Bucket boundaries on the numeric queue index
pub struct RenderQueueIndex;

impl RenderQueueIndex {
    pub const BACKGROUND: u32 = 0;
    pub const GEOMETRY: u32 = 100;
    pub const ALPHA_TEST: u32 = 2000;
    pub const GEOMETRY_LAST: u32 = 2500;
    pub const TRANSPARENCY: u32 = 3000;
    pub const OVERLAY: u32 = 4000;
}

/// Ordered bucket a drawable is classified into
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RenderQueueBucket {
    Background = 0,
    Geometry = 1,
    AlphaTest = 2,
    GeometryLast = 3,
    Transparency = 4,
    Overlay = 5,
}

impl RenderQueueBucket {
    /// Every bucket in draw order
    pub const ALL: [Self; 6] = [
        Self::Background,
        Self::Geometry,
        Self::AlphaTest,
        Self::GeometryLast,
        Self::Transparency,
        Self::Overlay,
    ];

    pub fn from_queue_index(index: u32) -> Self {
        match index {
            i if i < RenderQueueIndex::GEOMETRY => Self::Background,
            i if i < RenderQueueIndex::ALPHA_TEST => Self::Geometry,
            i if i < RenderQueueIndex::GEOMETRY_LAST => Self::AlphaTest,
            i if i < RenderQueueIndex::TRANSPARENCY => Self::GeometryLast,
            i if i < RenderQueueIndex::OVERLAY => Self::Transparency,
            _ => Self::Overlay,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn mask(self) -> QueueMask {
        QueueMask(1 << self as u32)
    }
}

/// Set of buckets selected for a draw call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueMask(u32);

impl QueueMask {
    pub const NONE: Self = Self(0);
    pub const BACKGROUND: Self = Self(1 << 0);
    pub const GEOMETRY: Self = Self(1 << 1);
    pub const ALPHA_TEST: Self = Self(1 << 2);
    pub const GEOMETRY_LAST: Self = Self(1 << 3);
    pub const TRANSPARENCY: Self = Self(1 << 4);
    pub const OVERLAY: Self = Self(1 << 5);

    /// Everything drawn into the G-buffer
    pub const OPAQUE: Self = Self(Self::BACKGROUND.0 | Self::GEOMETRY.0 | Self::ALPHA_TEST.0 | Self::GEOMETRY_LAST.0);

    pub const ALL: Self = Self(0b11_1111);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

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

    /// Selected buckets in draw order
    pub fn buckets(self) -> impl Iterator<Item = RenderQueueBucket> {
        RenderQueueBucket::ALL
            .into_iter()
            .filter(move |bucket| self.contains(bucket.mask()))
    }
}

impl core::ops::BitOr for QueueMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(RenderQueueBucket::from_queue_index(0), RenderQueueBucket::Background);
        assert_eq!(RenderQueueBucket::from_queue_index(99), RenderQueueBucket::Background);
        assert_eq!(RenderQueueBucket::from_queue_index(100), RenderQueueBucket::Geometry);
        assert_eq!(RenderQueueBucket::from_queue_index(1999), RenderQueueBucket::Geometry);
        assert_eq!(RenderQueueBucket::from_queue_index(2000), RenderQueueBucket::AlphaTest);
        assert_eq!(RenderQueueBucket::from_queue_index(2500), RenderQueueBucket::GeometryLast);
        assert_eq!(RenderQueueBucket::from_queue_index(3000), RenderQueueBucket::Transparency);
        assert_eq!(RenderQueueBucket::from_queue_index(4000), RenderQueueBucket::Overlay);
        assert_eq!(RenderQueueBucket::from_queue_index(u32::MAX), RenderQueueBucket::Overlay);
    }

    #[test]
    fn test_mask_buckets_in_order() {
        let buckets: Vec<_> = (QueueMask::OVERLAY | QueueMask::BACKGROUND).buckets().collect();
        assert_eq!(buckets, vec![RenderQueueBucket::Background, RenderQueueBucket::Overlay]);
        assert_eq!(QueueMask::OPAQUE.buckets().count(), 4);
        assert_eq!(QueueMask::ALL.buckets().count(), 6);
        assert!(QueueMask::NONE.is_empty());
    }

    #[test]
    fn test_mask_flags() {
        let mut mask = QueueMask::OPAQUE;
        assert!(mask.contains(QueueMask::GEOMETRY));
        mask.remove(QueueMask::GEOMETRY);
        assert!(!mask.contains(QueueMask::GEOMETRY));
        assert!(mask.intersects(QueueMask::ALPHA_TEST | QueueMask::OVERLAY));
        mask.insert(QueueMask::OVERLAY);
        assert!(mask.contains(RenderQueueBucket::Overlay.mask()));
    }
}
