//! Bit streaming through the PCM block
//!
//! The PCM transmitter shifts its FIFO out on the PCM data pin, most
//! significant bit first, one bit per PCM clock. A full bandwidth channel
//! keeps the FIFO filled, paced by the PCM transmit data request. The
//! output has no gaps between words, unlike GPIO streaming.

use crate::{
    address::{round_up_to_page, PhysicalAddress, PAGE_SIZE},
    clock::{self, Pacer},
    control_block::{ControlBlock, Dreq, Pacing, TransferRequest},
    memory::{Allocator, DmaBuffer},
    stream::{allocate, run_paced, BitOrder, BitStream, Streamer},
    Error, Result, STREAM_EXCLUDED,
};

/// FIFO_A, the transmit and receive FIFO
const FIFO_OFFSET: u32 = 0x04;

const LSB_FIRST: Error =
    Error::NotImplemented("PCM streaming of least significant bit first streams");

/// The PCM / I2S block, identified by its physical base address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pcm {
    base: PhysicalAddress,
}

impl Pcm {
    /// Describes a PCM block at `base`
    pub const fn new(base: PhysicalAddress) -> Self {
        Pcm { base }
    }

    /// Returns the FIFO register
    pub const fn fifo(&self) -> PhysicalAddress {
        self.base.offset(FIFO_OFFSET)
    }
}

/// Packs `stream` into FIFO words, returning how many were written
///
/// The first bit lands in the most significant bit of the first word.
/// The last word is padded with zeros.
pub fn pack(stream: &BitStream<'_>, words: &mut [u32]) -> Result<usize> {
    if stream.order() == BitOrder::Lsb {
        return Err(LSB_FIRST);
    }
    let len = stream.len().div_ceil(32);
    let words = words
        .get_mut(..len)
        .ok_or(Error::InvalidConfiguration("FIFO buffer is too short"))?;
    words.fill(0);
    for (index, level) in stream.levels().enumerate() {
        if level {
            words[index / 32] |= 0x8000_0000 >> (index % 32);
        }
    }
    Ok(len)
}

impl<'d, A: Allocator, P: Pacer> Streamer<'d, A, P> {
    /// Shifts `stream` out of the PCM data pin and blocks until the FIFO
    /// has taken all of it
    ///
    /// `transmitter` drives the PCM block the way a [`Pacer`] drives a
    /// clock: `stop` resets the block, and `start` runs its clock at the
    /// given rate and enables transmission. The pin must already be in its
    /// PCM function. Only most significant bit first streams are supported,
    /// and an empty stream does nothing.
    pub fn write_pcm<T: Pacer>(
        &mut self,
        pcm: Pcm,
        transmitter: &mut T,
        stream: &BitStream<'_>,
    ) -> Result<()> {
        if stream.order() == BitOrder::Lsb {
            return Err(LSB_FIRST);
        }
        if stream.is_empty() {
            return Ok(());
        }
        let hz = clock::frequency(stream.resolution())?;
        let clock = clock::compute_exact(hz, 0)?;

        // Control block on the first page, FIFO words after it.
        let bytes = stream.len().div_ceil(32) * 4;
        let length = u32::try_from(bytes)
            .map_err(|_| Error::InvalidConfiguration("PCM stream is too long"))?;
        let size = PAGE_SIZE + round_up_to_page(bytes);
        let mut buffer = allocate(&self.allocator, size)?;
        let base = buffer.physical_address();
        pack(stream, &mut buffer.as_words_mut()[PAGE_SIZE / 4..])?;
        let request = TransferRequest {
            source: Some(base.offset(PAGE_SIZE as u32)),
            destination: Some(pcm.fifo()),
            length,
            destination_is_register: true,
            source_increment: true,
            pacing: Pacing::Peripheral(Dreq::PcmTx),
            ..Default::default()
        };
        buffer.as_control_blocks_mut()[0] = ControlBlock::build(&request)?;
        log::debug!("PCM stream of {} bits at {hz} Hz", stream.len());

        // Safety: the buffer outlives the transfer.
        unsafe { run_paced(self.dma, transmitter, base, &clock, STREAM_EXCLUDED) }
    }
}
