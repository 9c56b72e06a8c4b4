//! Raster encoding for dual channel streaming
//!
//! A raster is one 32-bit word per tick. Two rasters drive one pin: the
//! set raster holds the pin mask on high ticks, the clear raster on low
//! ticks. Two channels, paced by the same clock, copy them into the set
//! and clear registers.
//!
//! Nothing synchronizes the two channels once they run. In practice they
//! drift and the output glitches, so [`Streamer::write`] is the default
//! and this module is the alternative.

use core::time::Duration;

use crate::{
    address::{round_up_to_page, PAGE_SIZE},
    clock::{self, Pacer},
    control_block::{ControlBlock, Pacing, TransferRequest, MAX_LITE_LENGTH, MAX_WAIT_CYCLES},
    gpio::Pin,
    memory::{Allocator, DmaBuffer},
    stream::{allocate, BitStream, Streamer, PACING_DREQ},
    Error, Result, Transfer, LITE_CHANNELS, STREAM_EXCLUDED,
};

/// Returns the ticks per bit when sampling `stream` at `resolution`
fn ticks_per_bit(stream: &BitStream<'_>, resolution: Duration) -> Result<usize> {
    let bit = stream.resolution().as_nanos();
    let tick = resolution.as_nanos();
    if tick == 0 || bit == 0 || bit % tick != 0 {
        return Err(Error::InvalidConfiguration(
            "the stream resolution must be a multiple of the raster resolution",
        ));
    }
    usize::try_from(bit / tick).map_err(|_| Error::InvalidConfiguration("raster is too long"))
}

/// Encodes `stream` into clear and set rasters, one word per `resolution`
///
/// Each bit lasts `stream.resolution() / resolution` ticks. For each tick,
/// `set` receives `mask` if the bit is 1, and `clear` receives `mask` if the
/// bit is 0; the other gets 0. Returns the number of ticks written.
pub fn encode(
    stream: &BitStream<'_>,
    resolution: Duration,
    mask: u32,
    clear: &mut [u32],
    set: &mut [u32],
) -> Result<usize> {
    let ticks_per_bit = ticks_per_bit(stream, resolution)?;
    let ticks = stream
        .len()
        .checked_mul(ticks_per_bit)
        .ok_or(Error::InvalidConfiguration("raster is too long"))?;
    if clear.len() < ticks || set.len() < ticks {
        return Err(Error::InvalidConfiguration("raster buffers are too short"));
    }
    let ticks_by_bit = clear[..ticks]
        .chunks_exact_mut(ticks_per_bit)
        .zip(set[..ticks].chunks_exact_mut(ticks_per_bit));
    for (level, (clear, set)) in stream.levels().zip(ticks_by_bit) {
        let (high, low) = if level { (mask, 0) } else { (0, mask) };
        set.fill(high);
        clear.fill(low);
    }
    Ok(ticks)
}

/// Clear and set rasters in DMA memory
pub struct Raster<B> {
    clear: B,
    set: B,
    ticks: usize,
}

impl<B: DmaBuffer> Raster<B> {
    /// Allocates and encodes the rasters for `stream`, driving `pin`, at the
    /// stream's own resolution
    pub fn new<A>(allocator: &A, pin: Pin, stream: &BitStream<'_>) -> Result<Self>
    where
        A: Allocator<Buffer = B>,
    {
        let bytes = stream
            .len()
            .checked_mul(4)
            .ok_or(Error::InvalidConfiguration("raster is too long"))?;
        let size = round_up_to_page(bytes);
        let mut clear = allocate(allocator, size)?;
        let mut set = allocate(allocator, size)?;
        let ticks = encode(
            stream,
            stream.resolution(),
            pin.mask(),
            clear.as_words_mut(),
            set.as_words_mut(),
        )?;
        Ok(Raster { clear, set, ticks })
    }

    /// Number of ticks
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    /// The clear raster
    pub fn clear(&self) -> &B {
        &self.clear
    }

    /// The set raster
    pub fn set(&self) -> &B {
        &self.set
    }
}

impl<'d, A: Allocator, P: Pacer> Streamer<'d, A, P> {
    /// Writes `stream` to `pin` with two channels racing on the set and clear
    /// registers
    ///
    /// The channels drift apart, so the output glitches. Prefer
    /// [`Streamer::write`].
    pub fn write_dual_channel(&mut self, pin: Pin, stream: &BitStream<'_>) -> Result<()> {
        if stream.is_empty() {
            return Ok(());
        }
        log::warn!("dual channel streaming is known to glitch");
        let hz = clock::frequency(stream.resolution())?;
        let clock = clock::compute_exact(hz, MAX_WAIT_CYCLES)?;

        let raster = Raster::new(&self.allocator, pin, stream)?;
        let length = u32::try_from(raster.ticks() * 4)
            .map_err(|_| Error::InvalidConfiguration("raster is too long"))?;
        let mut chain = allocate(&self.allocator, PAGE_SIZE)?;
        let base = chain.physical_address();
        let block = |source: &A::Buffer, level: bool| {
            ControlBlock::build(&TransferRequest {
                source: Some(source.physical_address()),
                destination: Some(self.gpio.level_target(pin, level)),
                length,
                destination_is_register: true,
                source_increment: true,
                pacing: Pacing::Peripheral(PACING_DREQ),
                wait_cycles: clock.wait_cycles,
                ..Default::default()
            })
        };
        let set = block(raster.set(), true)?;
        let clear = block(raster.clear(), false)?;
        let blocks = chain.as_control_blocks_mut();
        blocks[0] = set;
        blocks[1] = clear;

        // Both channels must be picked before the clock starts.
        self.pacer.stop();
        let mut set_channel = self
            .dma
            .pick_channel(STREAM_EXCLUDED)
            .ok_or(Error::ResourceExhausted)?;
        let exclude = if length > MAX_LITE_LENGTH {
            LITE_CHANNELS
        } else {
            &[][..]
        };
        let mut clear_channel = self
            .dma
            .pick_channel(exclude)
            .ok_or(Error::ResourceExhausted)?;
        log::debug!(
            "dual channel stream on {} and {}",
            set_channel.channel(),
            clear_channel.channel()
        );
        // Safety: the chain and the rasters outlive both transfers.
        let set_transfer = unsafe { Transfer::start(&mut set_channel, base) };
        let clear_transfer = unsafe {
            Transfer::start(
                &mut clear_channel,
                base.offset(ControlBlock::SIZE as u32),
            )
        };
        self.pacer.start(&clock);
        let set_result = set_transfer.wait();
        let clear_result = clear_transfer.wait();
        drop(clear_transfer);
        drop(set_transfer);
        self.pacer.stop();
        set_result.and(clear_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mock::MockAllocator, stream::BitOrder};

    const MASK: u32 = 1 << 18;

    #[test]
    fn one_word_per_bit() {
        let stream = BitStream::with_bit_len(
            &[0b1000_0000],
            2,
            BitOrder::Msb,
            Duration::from_micros(1),
        )
        .unwrap();
        let mut clear = [0xFFFF_FFFF; 2];
        let mut set = [0xFFFF_FFFF; 2];
        let ticks = encode(&stream, Duration::from_micros(1), MASK, &mut clear, &mut set).unwrap();
        assert_eq!(ticks, 2);
        assert_eq!(set, [MASK, 0]);
        assert_eq!(clear, [0, MASK]);
    }

    #[test]
    fn oversampled_bits() {
        let stream = BitStream::with_bit_len(
            &[0b0100_0000],
            2,
            BitOrder::Msb,
            Duration::from_micros(3),
        )
        .unwrap();
        let mut clear = [0; 8];
        let mut set = [0; 8];
        let ticks = encode(&stream, Duration::from_micros(1), MASK, &mut clear, &mut set).unwrap();
        assert_eq!(ticks, 6);
        assert_eq!(set[..6], [0, 0, 0, MASK, MASK, MASK]);
        assert_eq!(clear[..6], [MASK, MASK, MASK, 0, 0, 0]);
        // Past the stream is left alone.
        assert_eq!(set[6..], [0, 0]);
    }

    #[test]
    fn rejects_fractional_ticks_and_short_buffers() {
        let stream = BitStream::new(&[0xFF], BitOrder::Msb, Duration::from_micros(3));
        let mut clear = [0; 32];
        let mut set = [0; 32];
        assert!(encode(&stream, Duration::from_micros(2), MASK, &mut clear, &mut set).is_err());
        let tick = Duration::from_micros(1);
        assert!(encode(&stream, tick, MASK, &mut clear[..23], &mut set).is_err());
        assert!(encode(&stream, Duration::from_micros(1), MASK, &mut clear, &mut set).is_ok());
    }

    #[test]
    fn raster_buffers() {
        let allocator = MockAllocator::new();
        let stream = BitStream::new(&[0b1100_0000], BitOrder::Msb, Duration::from_micros(1));
        let raster = Raster::new(&allocator, Pin::new(18).unwrap(), &stream).unwrap();
        assert_eq!(raster.ticks(), 8);
        assert_eq!(raster.set().as_words()[..3], [MASK, MASK, 0]);
        assert_eq!(raster.clear().as_words()[..3], [0, 0, MASK]);
        assert_eq!(raster.set().len(), PAGE_SIZE);
    }
}
