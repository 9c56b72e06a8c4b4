//! DMA-powered memcpy

use crate::{
    address::PAGE_SIZE,
    control_block::{ControlBlock, TransferRequest, MAX_LITE_LENGTH},
    memory::{Allocator, DmaBuffer},
    ral::dma::ENABLE_ALL,
    stream::allocate,
    DebugStatus, Dma, Error, Result,
};

/// Size of the smoke test copy
pub const SMOKE_TEST_SIZE: usize = 4 * PAGE_SIZE;

/// Bytes left untouched at each end of the smoke test copy
const GUARD: usize = 1;

/// Perform a DMA-powered `memcpy` of `len` bytes between two DMA buffers
///
/// Copies `source[source_offset..][..len]` into
/// `destination[destination_offset..][..len]`, and blocks until the copy is
/// complete. Lite channels are used when the copy fits.
pub fn memcpy<A, S, D>(
    dma: &Dma,
    allocator: &A,
    source: &S,
    source_offset: usize,
    destination: &mut D,
    destination_offset: usize,
    len: usize,
) -> Result<()>
where
    A: Allocator,
    S: DmaBuffer,
    D: DmaBuffer,
{
    let in_bounds = |offset: usize, buffer_len: usize| {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= buffer_len)
    };
    if !in_bounds(source_offset, source.len()) || !in_bounds(destination_offset, destination.len())
    {
        return Err(Error::InvalidConfiguration("copy exceeds a buffer"));
    }
    let length =
        u32::try_from(len).map_err(|_| Error::InvalidConfiguration("copy is too long"))?;
    let request = TransferRequest::memcpy(
        source.physical_address().offset(source_offset as u32),
        destination.physical_address().offset(destination_offset as u32),
        length,
    );
    let block = ControlBlock::build(&request)?;

    let mut chain = allocate(allocator, PAGE_SIZE)?;
    chain.as_control_blocks_mut()[0] = block;
    log::debug!("memcpy {len} bytes: {block}");
    // Safety: the chain and both buffers outlive the synchronous run.
    unsafe { dma.run_synchronous(chain.physical_address(), length <= MAX_LITE_LENGTH) }
}

/// Checks that the DMA controller looks and behaves as expected
///
/// Channel 6 must be a full bandwidth channel, channel 7 a lite one, and
/// every channel must be enabled. Then a 16KiB pattern is copied between
/// two fresh buffers, leaving a guard byte at each end, and verified.
pub fn smoke_test<A: Allocator>(dma: &Dma, allocator: &A) -> Result<()> {
    if dma.debug_status(6).is_some_and(DebugStatus::is_lite) {
        return Err(Error::UnexpectedHardware("DMA channel 6 shouldn't be lite"));
    }
    if !dma.debug_status(7).is_some_and(DebugStatus::is_lite) {
        return Err(Error::UnexpectedHardware("DMA channel 7 should be lite"));
    }
    if dma.enabled_channels() != ENABLE_ALL {
        return Err(Error::UnexpectedHardware("DMA enable is not fully set"));
    }

    let mut source = allocate(allocator, SMOKE_TEST_SIZE)?;
    let mut destination = allocate(allocator, SMOKE_TEST_SIZE)?;
    for (index, byte) in source.as_bytes_mut()[..SMOKE_TEST_SIZE].iter_mut().enumerate() {
        *byte = pattern(index);
    }
    destination.as_bytes_mut().fill(GUARD_BYTE);

    let len = SMOKE_TEST_SIZE - 2 * GUARD;
    memcpy(dma, allocator, &source, GUARD, &mut destination, GUARD, len)?;

    let copied = &destination.as_bytes()[..SMOKE_TEST_SIZE];
    let expected = |index: usize| {
        if index < GUARD || index >= SMOKE_TEST_SIZE - GUARD {
            GUARD_BYTE
        } else {
            pattern(index)
        }
    };
    match copied
        .iter()
        .enumerate()
        .position(|(index, &byte)| byte != expected(index))
    {
        Some(offset) => Err(Error::CopyMismatch { offset }),
        None => Ok(()),
    }
}

/// Fill value of the destination before the copy
const GUARD_BYTE: u8 = 0xA5;

/// Never equal to GUARD_BYTE at the guard positions
fn pattern(index: usize) -> u8 {
    (index % 251) as u8
}
