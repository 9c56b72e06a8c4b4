//! Physical and bus addresses
//!
//! The CPU and the DMA controller see the same RAM and peripherals
//! through different address windows. The DMA controller must be
//! given bus addresses for peripheral registers, and the uncached
//! alias of physical addresses for normal memory. Translation is
//! never inferred; callers state which window they need.

use core::fmt;

/// Page granularity of the physical memory allocator
pub const PAGE_SIZE: usize = 4096;

/// Keeps the offset of a register within the peripheral window
const PERIPHERAL_MASK: u32 = 0x00FF_FFFF;
/// Base of the peripheral window as seen from the DMA bus
pub const PERIPHERAL_BUS_BASE: u32 = 0x7E00_0000;
/// RAM alias that bypasses the L1 and L2 caches
pub const UNCACHED_ALIAS: u32 = 0xC000_0000;

/// An address in the CPU's physical address space
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysicalAddress(pub u32);

/// An address as the DMA controller sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct BusAddress(pub u32);

impl PhysicalAddress {
    /// Returns the raw address value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Offsets the address by `bytes`
    pub const fn offset(self, bytes: u32) -> Self {
        PhysicalAddress(self.0.wrapping_add(bytes))
    }

    /// Returns `true` if the address starts a page
    pub const fn is_page_aligned(self) -> bool {
        self.0 as usize % PAGE_SIZE == 0
    }
}

impl BusAddress {
    /// Returns the raw address value
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus:{:#010x}", self.0)
    }
}

/// Translates the physical address of a peripheral register into
/// the bus address the DMA controller writes to
///
/// Only the offset within the peripheral window survives, so the
/// translation is idempotent.
pub const fn to_bus_address(p: PhysicalAddress) -> BusAddress {
    BusAddress((p.0 & PERIPHERAL_MASK) | PERIPHERAL_BUS_BASE)
}

/// Translates a physical RAM address into its uncached alias
///
/// `p` must lie within an allocation that starts on a page boundary.
/// Writes through the alias are visible to the DMA controller without
/// a cache flush.
pub const fn to_uncached_physical(p: PhysicalAddress) -> BusAddress {
    BusAddress(p.0 | UNCACHED_ALIAS)
}

/// Rounds `size` up to the allocator's page granularity
pub const fn round_up_to_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
