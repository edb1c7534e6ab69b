//! Vocabulary of the VR4300, the main CPU of the N64.
//!
//! The CPU runs in 32-bit kernel mode with paging disabled, so the only translation between
//! virtual and physical addresses is through the fixed KSEG windows.
#![cfg_attr(target_arch = "mips", feature(asm_experimental_arch))]

pub mod cache;
pub mod cop0;

use strum::FromRepr;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Nominal clock speed of the CPU, in Hz.
pub const CLOCK_SPEED: u32 = 93_750_000;

/// Size of a data cache line, in bytes.
pub const CACHE_LINE: usize = 16;

/// Base of the unmapped, cached window.
pub const KSEG0: u32 = 0x8000_0000;
/// Base of the unmapped, uncached window.
pub const KSEG1: u32 = 0xA000_0000;

const SEGMENT_MASK: u32 = 0xE000_0000;

/// A kernel segment of the 32-bit address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Segment {
    KUseg = 0,
    Kseg0 = 4,
    Kseg1 = 5,
    Ksseg = 6,
    Kseg3 = 7,
}

macro_rules! address_ops {
    ($name:ident) => {
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    "0x{:04X}_{:04X}",
                    (self.0 & 0xFFFF_0000) >> 16,
                    self.0 & 0xFFFF
                )
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self)
            }
        }

        impl $name {
            /// Returns the value of this address. Equivalent to `self.0`.
            #[inline(always)]
            pub const fn value(self) -> u32 {
                self.0
            }

            /// Whether this address is null.
            #[inline(always)]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Whether this address is a multiple of `alignment`.
            #[inline(always)]
            pub const fn is_aligned(self, alignment: u32) -> bool {
                self.0 % alignment == 0
            }

            /// Aligns this address down to the given alignment.
            pub const fn align_down(self, alignment: u32) -> Self {
                let rem = self.0 % alignment;
                Self(self.0 - rem)
            }

            /// Aligns this address up to the given alignment.
            pub const fn align_up(self, alignment: u32) -> Self {
                Self(self.0.next_multiple_of(alignment))
            }
        }

        impl std::ops::Add<u32> for $name {
            type Output = Self;

            #[inline(always)]
            fn add(self, rhs: u32) -> Self::Output {
                Self(self.0.wrapping_add(rhs))
            }
        }

        impl std::ops::AddAssign<u32> for $name {
            #[inline(always)]
            fn add_assign(&mut self, rhs: u32) {
                *self = *self + rhs;
            }
        }

        impl std::ops::Sub<u32> for $name {
            type Output = Self;

            #[inline(always)]
            fn sub(self, rhs: u32) -> Self::Output {
                Self(self.0.wrapping_sub(rhs))
            }
        }

        impl std::ops::Sub<$name> for $name {
            type Output = i64;

            #[inline(always)]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 as i64 - rhs.0 as i64
            }
        }

        impl PartialEq<u32> for $name {
            #[inline(always)]
            fn eq(&self, other: &u32) -> bool {
                self.0 == *other
            }
        }

        impl From<u32> for $name {
            #[inline(always)]
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

/// A virtual address in one of the kernel segments. This is a thin wrapper around an [`u32`].
#[repr(transparent)]
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, IntoBytes, FromBytes, Immutable,
)]
pub struct Address(pub u32);

/// A physical address, as seen by the RCP and every DMA engine. This is a thin wrapper around an
/// [`u32`].
#[repr(transparent)]
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, IntoBytes, FromBytes, Immutable,
)]
pub struct PhysAddr(pub u32);

address_ops!(Address);
address_ops!(PhysAddr);

impl Address {
    /// The kernel segment this address lies in.
    pub fn segment(self) -> Segment {
        // the top three bits always name a valid segment, with 1..=3 all belonging to kuseg
        let top = (self.0 >> 29) as u8;
        Segment::from_repr(top).unwrap_or(Segment::KUseg)
    }

    /// Translates this address into a physical one. Only addresses in KSEG0 and KSEG1 are
    /// directly mapped.
    pub fn physical(self) -> Option<PhysAddr> {
        matches!(self.segment(), Segment::Kseg0 | Segment::Kseg1)
            .then_some(PhysAddr(self.0 & !SEGMENT_MASK))
    }
}

impl PhysAddr {
    /// The address through which the CPU accesses this location with caching enabled.
    #[inline(always)]
    pub const fn cached(self) -> Address {
        Address(self.0 | KSEG0)
    }

    /// The address through which the CPU accesses this location bypassing the cache.
    #[inline(always)]
    pub const fn uncached(self) -> Address {
        Address(self.0 | KSEG1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn segments() {
        assert_eq!(Address(0x8000_0400).segment(), Segment::Kseg0);
        assert_eq!(Address(0xA460_0010).segment(), Segment::Kseg1);
        assert_eq!(Address(0x2000_0000).segment(), Segment::KUseg);
        assert_eq!(Address(0xC000_0000).segment(), Segment::Ksseg);
    }

    #[test]
    fn translation() {
        let phys = PhysAddr(0x0460_0010);
        assert_eq!(phys.uncached(), Address(0xA460_0010));
        assert_eq!(phys.cached(), Address(0x8460_0010));
        assert_eq!(phys.uncached().physical(), Some(phys));
        assert_eq!(Address(0x1000_0000).physical(), None);
    }

    #[test]
    fn display() {
        assert_eq!(PhysAddr(0x0410_000C).to_string(), "0x0410_000C");
        assert_eq!(PhysAddr(0x1234).align_up(16), PhysAddr(0x1240));
        assert_eq!(PhysAddr(0x1234).align_down(16), PhysAddr(0x1230));
    }
}
