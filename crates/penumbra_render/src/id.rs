//! Generational identifiers for lights, probes and drawables

use core::fmt;

use serde::{Deserialize, Serialize};

macro_rules! generational_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name {
            /// Lower 32 bits: index, upper 32 bits: generation
            bits: u64,
        }

        impl $name {
            #[inline]
            pub const fn new(index: u32, generation: u32) -> Self {
                Self {
                    bits: (generation as u64) << 32 | index as u64,
                }
            }

            #[inline]
            pub const fn index(&self) -> u32 {
                self.bits as u32
            }

            #[inline]
            pub const fn generation(&self) -> u32 {
                (self.bits >> 32) as u32
            }

            #[inline]
            pub const fn to_bits(&self) -> u64 {
                self.bits
            }

            #[inline]
            pub const fn from_bits(bits: u64) -> Self {
                Self { bits }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "({}v{})"), self.index(), self.generation())
            }
        }
    };
}

generational_id!(
    /// Stable handle of a registered light
    LightId,
    "Light"
);

generational_id!(
    /// Handle of a registered light probe
    ProbeId,
    "Probe"
);

generational_id!(
    /// Handle of a drawable in the render manager's arena.
    ///
    /// The index doubles as the BVH leaf `object_index`.
    DrawableId,
    "Drawable"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_packing() {
        let id = LightId::new(7, 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.generation(), 3);
        assert_eq!(LightId::from_bits(id.to_bits()), id);
    }

    #[test]
    fn test_id_ordering_follows_generation_then_index() {
        assert!(DrawableId::new(5, 0) < DrawableId::new(1, 1));
        assert!(DrawableId::new(1, 0) < DrawableId::new(2, 0));
    }

    #[test]
    fn test_id_debug() {
        assert_eq!(format!("{:?}", ProbeId::new(2, 1)), "Probe(2v1)");
    }
}
