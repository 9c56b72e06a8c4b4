//! A RAL-like module to support DMA register access
//!
//! The DMA controller repeats the same channel register layout fifteen
//! times, then places channel 15 at a completely different base. This
//! module describes one channel as a struct, and the controller as an
//! array of those structs. The field modules let us use the RAL macros.

#![allow(
    non_snake_case, // Compatibility with RAL
    non_upper_case_globals,
    dead_code, // Full register descriptions
)]

/// Declares a register field as a RAL field module
///
/// Produces the `offset`, `mask`, `R`, `W` and `RW` items that
/// `read_reg!` and `write_reg!` expect.
macro_rules! field {
    ($(#[$attr:meta])* $name:ident, $offset:expr, $width:expr) => {
        $(#[$attr])*
        pub mod $name {
            pub const offset: u32 = $offset;
            pub const mask: u32 = (((1u64 << $width) - 1) << $offset) as u32;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    };
}

pub mod dma;

pub use ral_registers::{read_reg, write_reg};

//
// Helper type for static memory
//
// Similar to the RAL's `Instance` type, but more copy.
//

pub(crate) struct Static<T>(pub(crate) *const T);
impl<T> core::ops::Deref for Static<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // Safety: pointer points to static memory (peripheral memory)
        unsafe { &*self.0 }
    }
}
impl<T> Clone for Static<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Static<T> {}

