//! Physically contiguous memory for the DMA controller
//!
//! The driver doesn't allocate DMA memory itself. It asks an
//! [`Allocator`], usually backed by the VideoCore mailbox or a
//! reserved carve-out, for buffers with a known physical address.

use crate::{address::PhysicalAddress, control_block::ControlBlock, Result};

/// A buffer the DMA controller can read and write
///
/// Dropping the buffer releases it back to its allocator.
///
/// # Safety
///
/// `DmaBuffer` should only be implemented on buffers that are physically
/// contiguous, start on a page boundary, and don't move while the buffer
/// exists. `physical_address` must describe the first byte of `as_bytes`.
pub unsafe trait DmaBuffer {
    /// Returns the physical address of the first byte
    fn physical_address(&self) -> PhysicalAddress;
    /// Returns the buffer contents
    fn as_bytes(&self) -> &[u8];
    /// Returns the buffer contents for modification
    fn as_bytes_mut(&mut self) -> &mut [u8];

    /// Returns the buffer length in bytes
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the buffer has no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the buffer as 32-bit words
    ///
    /// Trailing bytes that don't fill a word are not included.
    fn as_words(&self) -> &[u32] {
        // Safety: any bit pattern is a valid u32. Page alignment is a
        // trait requirement, so there's no unaligned prefix.
        let (prefix, words, _) = unsafe { self.as_bytes().align_to::<u32>() };
        debug_assert!(prefix.is_empty());
        words
    }

    /// Returns the buffer as 32-bit words for modification
    fn as_words_mut(&mut self) -> &mut [u32] {
        // Safety: see as_words.
        let (prefix, words, _) = unsafe { self.as_bytes_mut().align_to_mut::<u32>() };
        debug_assert!(prefix.is_empty());
        words
    }

    /// Returns the buffer as control blocks
    fn as_control_blocks(&self) -> &[ControlBlock] {
        // Safety: ControlBlock is plain u32s, any bit pattern is valid.
        // Page alignment covers the 32 byte alignment.
        let (prefix, blocks, _) = unsafe { self.as_bytes().align_to::<ControlBlock>() };
        debug_assert!(prefix.is_empty());
        blocks
    }

    /// Returns the buffer as control blocks for modification
    fn as_control_blocks_mut(&mut self) -> &mut [ControlBlock] {
        // Safety: see as_control_blocks.
        let (prefix, blocks, _) = unsafe { self.as_bytes_mut().align_to_mut::<ControlBlock>() };
        debug_assert!(prefix.is_empty());
        blocks
    }
}

/// Allocates physically contiguous, page aligned buffers
pub trait Allocator {
    /// The buffer type; released on drop
    type Buffer: DmaBuffer;

    /// Allocates at least `size` bytes
    ///
    /// Implementations return [`Error::AllocationFailed`](crate::Error::AllocationFailed)
    /// when they can't satisfy the request. Fresh buffers should be zeroed.
    fn allocate(&self, size: usize) -> Result<Self::Buffer>;
}

impl<A: Allocator + ?Sized> Allocator for &A {
    type Buffer = A::Buffer;

    fn allocate(&self, size: usize) -> Result<Self::Buffer> {
        (**self).allocate(size)
    }
}
