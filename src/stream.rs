//! GPIO bit streaming
//!
//! A bit stream drives one pin, one bit per tick. Instead of one write per
//! tick, [`compile`] coalesces equal bits into runs. Each run becomes one
//! control block that writes the pin mask to the pin's set or clear
//! register `stride` times, paced by the clock. The pin holds its level
//! between edges, so the repeated writes only burn time.
//!
//! Memory use is one page for the mask, plus 32 bytes per run.

use core::{iter::Peekable, time::Duration};

use crate::{
    address::{round_up_to_page, PhysicalAddress, PAGE_SIZE},
    clock::{self, ClockConfig, Pacer},
    control_block::{ControlBlock, Dreq, Pacing, TransferRequest, MAX_LITE_LENGTH},
    gpio::{Gpio, Pin},
    memory::{Allocator, DmaBuffer},
    Dma, Error, Result, Transfer, STREAM_EXCLUDED,
};

/// Longest run of one control block, in ticks
pub const MAX_STRIDE: u32 = 1024;

/// The data request line that paces streams
///
/// The PWM block is clocked from the clock manager, so its DREQ
/// fires at the configured rate.
pub const PACING_DREQ: Dreq = Dreq::Pwm;

/// Bit order within each byte of a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitOrder {
    /// Bit 7 of each byte goes first
    Msb,
    /// Bit 0 of each byte goes first
    Lsb,
}

/// A sequence of bits, each lasting `resolution`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitStream<'a> {
    bits: &'a [u8],
    len: usize,
    order: BitOrder,
    resolution: Duration,
}

impl<'a> BitStream<'a> {
    /// Every bit of `bits`
    pub const fn new(bits: &'a [u8], order: BitOrder, resolution: Duration) -> Self {
        BitStream {
            bits,
            len: bits.len() * 8,
            order,
            resolution,
        }
    }

    /// The first `len` bits of `bits`
    pub fn with_bit_len(
        bits: &'a [u8],
        len: usize,
        order: BitOrder,
        resolution: Duration,
    ) -> Result<Self> {
        if len > bits.len() * 8 {
            return Err(Error::InvalidConfiguration(
                "bit length exceeds the byte buffer",
            ));
        }
        Ok(BitStream {
            bits,
            len,
            order,
            resolution,
        })
    }

    /// Number of bits
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no bits
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit order within each byte
    pub const fn order(&self) -> BitOrder {
        self.order
    }

    /// Duration of one bit
    pub const fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Total duration of the stream, or `None` if it overflows
    pub fn duration(&self) -> Option<Duration> {
        u32::try_from(self.len)
            .ok()
            .and_then(|len| self.resolution.checked_mul(len))
    }

    /// Iterates the bits, in time order
    pub fn levels(&self) -> Levels<'a> {
        Levels {
            bits: self.bits,
            order: self.order,
            index: 0,
            len: self.len,
        }
    }

    /// Iterates the runs of equal bits, split at [`MAX_STRIDE`]
    pub fn runs(&self) -> Runs<Levels<'a>> {
        Runs::new(self.levels())
    }
}

/// Iterator over the bits of a [`BitStream`]
#[derive(Clone, Debug)]
pub struct Levels<'a> {
    bits: &'a [u8],
    order: BitOrder,
    index: usize,
    len: usize,
}

impl Iterator for Levels<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.index >= self.len {
            return None;
        }
        let byte = self.bits[self.index / 8];
        let bit = (self.index % 8) as u32;
        let shift = match self.order {
            BitOrder::Msb => 7 - bit,
            BitOrder::Lsb => bit,
        };
        self.index += 1;
        Some((byte >> shift) & 1 != 0)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Levels<'_> {}

/// A run of equal levels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    /// Pin level during the run
    pub level: bool,
    /// Length in ticks, `1..=MAX_STRIDE`
    pub stride: u32,
}

/// Coalesces levels into runs
///
/// A run closes when the level changes, or when it reaches [`MAX_STRIDE`].
/// Consecutive runs may have the same level.
#[derive(Clone, Debug)]
pub struct Runs<I: Iterator<Item = bool>> {
    levels: Peekable<I>,
}

impl<I: Iterator<Item = bool>> Runs<I> {
    /// Wraps an iterator of levels
    pub fn new(levels: I) -> Self {
        Runs {
            levels: levels.peekable(),
        }
    }
}

impl<I: Iterator<Item = bool>> Iterator for Runs<I> {
    type Item = Run;

    fn next(&mut self) -> Option<Run> {
        let level = self.levels.next()?;
        let mut stride = 1;
        while stride < MAX_STRIDE && self.levels.next_if_eq(&level).is_some() {
            stride += 1;
        }
        Some(Run { level, stride })
    }
}

/// A control block chain in DMA memory, ready to run
///
/// The chain starts at the beginning of the buffer. The buffer is released
/// when the program is dropped, so keep it alive while a channel runs it.
pub struct CompiledProgram<B> {
    buffer: B,
    blocks: usize,
    clock: ClockConfig,
}

impl<B: DmaBuffer> CompiledProgram<B> {
    /// The chain, in execution order
    pub fn control_blocks(&self) -> &[ControlBlock] {
        &self.buffer.as_control_blocks()[..self.blocks]
    }

    /// Physical address of the first control block
    pub fn address(&self) -> PhysicalAddress {
        self.buffer.physical_address()
    }

    /// Number of control blocks
    pub fn len(&self) -> usize {
        self.blocks
    }

    /// Returns `true` if there are no control blocks
    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    /// The pacing clock the chain was compiled for
    pub fn clock(&self) -> &ClockConfig {
        &self.clock
    }

    /// Returns `true` if a lite channel could run every block
    pub fn fits_lite(&self) -> bool {
        self.control_blocks().iter().all(ControlBlock::fits_lite)
    }

    /// The backing buffer
    pub fn buffer(&self) -> &B {
        &self.buffer
    }
}

/// Compiles `stream` into a control block chain that drives `pin`
///
/// The resolution must divide one second evenly, and the resulting rate
/// must be one the hardware produces exactly; otherwise this returns
/// [`Error::OversamplingUnsupported`]. An empty stream is rejected.
pub fn compile<A: Allocator>(
    allocator: &A,
    gpio: Gpio,
    pin: Pin,
    stream: &BitStream<'_>,
) -> Result<CompiledProgram<A::Buffer>> {
    if stream.is_empty() {
        return Err(Error::InvalidConfiguration("empty bit stream"));
    }
    let hz = clock::frequency(stream.resolution())?;
    // Wait cycles don't pace as expected here; rely on the divisor.
    let clock = clock::compute_exact(hz, 0)?;

    let blocks = stream.runs().count();
    let size = round_up_to_page(blocks * ControlBlock::SIZE + PAGE_SIZE);
    let mut buffer = allocate(allocator, size)?;
    let base = buffer.physical_address();

    // The mask page is the last page of the buffer.
    let mask_offset = size - PAGE_SIZE;
    buffer.as_words_mut()[mask_offset / 4] = pin.mask();
    let mask = base.offset(mask_offset as u32);

    let chain = &mut buffer.as_control_blocks_mut()[..blocks];
    for (index, run) in stream.runs().enumerate() {
        let request = TransferRequest {
            source: Some(mask),
            destination: Some(gpio.level_target(pin, run.level)),
            length: run.stride * 4,
            destination_is_register: true,
            pacing: Pacing::Peripheral(PACING_DREQ),
            ..Default::default()
        };
        let mut block = ControlBlock::build(&request)?;
        if index + 1 < blocks {
            block.next = base.offset((ControlBlock::SIZE * (index + 1)) as u32).raw();
        }
        chain[index] = block;
    }
    log::debug!(
        "compiled {} bits into {blocks} control blocks, {size} bytes, at {hz} Hz",
        stream.len()
    );
    Ok(CompiledProgram {
        buffer,
        blocks,
        clock,
    })
}

/// Allocates a buffer and checks the allocator's guarantees
pub(crate) fn allocate<A: Allocator>(allocator: &A, size: usize) -> Result<A::Buffer> {
    let buffer = allocator.allocate(size)?;
    if buffer.len() < size || !buffer.physical_address().is_page_aligned() {
        return Err(Error::AllocationFailed { size });
    }
    Ok(buffer)
}

/// Streams bits in and out of GPIO pins
///
/// The streamer owns the allocator and the pacing clock, and borrows the
/// driver. Every stream picks a full bandwidth channel and releases it
/// before returning.
pub struct Streamer<'d, A, P> {
    pub(crate) dma: &'d Dma,
    pub(crate) allocator: A,
    pub(crate) pacer: P,
    pub(crate) gpio: Gpio,
}

impl<'d, A: Allocator, P: Pacer> Streamer<'d, A, P> {
    /// Creates a streamer
    pub fn new(dma: &'d Dma, allocator: A, pacer: P, gpio: Gpio) -> Self {
        Streamer {
            dma,
            allocator,
            pacer,
            gpio,
        }
    }

    /// Returns the allocator
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Returns the pacing clock
    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    /// Releases the allocator and the pacing clock
    pub fn release(self) -> (A, P) {
        (self.allocator, self.pacer)
    }

    /// Writes `stream` to `pin` and blocks until it's done
    ///
    /// An empty stream does nothing.
    pub fn write(&mut self, pin: Pin, stream: &BitStream<'_>) -> Result<()> {
        if stream.is_empty() {
            return Ok(());
        }
        let program = compile(&self.allocator, self.gpio, pin, stream)?;
        // Safety: the program outlives the transfer.
        unsafe {
            run_paced(
                self.dma,
                &mut self.pacer,
                program.address(),
                program.clock(),
                STREAM_EXCLUDED,
            )
        }
    }

    /// Samples `pin` once per `resolution` into `bits`, most significant bit
    /// first, and blocks until `bits` is full
    ///
    /// Least significant bit first isn't supported.
    pub fn read(
        &mut self,
        pin: Pin,
        resolution: Duration,
        order: BitOrder,
        bits: &mut [u8],
    ) -> Result<()> {
        if order == BitOrder::Lsb {
            return Err(Error::NotImplemented(
                "reading a least significant bit first stream",
            ));
        }
        if bits.is_empty() {
            return Ok(());
        }
        let hz = clock::frequency(resolution)?;
        let clock = clock::compute_exact(hz, 0)?;

        // One 32-bit sample per bit, after a page for the control block.
        let samples = bits.len() * 8;
        let length = u32::try_from(samples * 4)
            .map_err(|_| Error::InvalidConfiguration("read is too long"))?;
        let size = PAGE_SIZE + round_up_to_page(samples * 4);
        let mut buffer = allocate(&self.allocator, size)?;
        let base = buffer.physical_address();
        let request = TransferRequest {
            source: Some(self.gpio.level_register(pin)),
            destination: Some(base.offset(PAGE_SIZE as u32)),
            length,
            source_is_register: true,
            destination_increment: true,
            pacing: Pacing::Peripheral(PACING_DREQ),
            ..Default::default()
        };
        buffer.as_control_blocks_mut()[0] = ControlBlock::build(&request)?;

        let exclude = if length > MAX_LITE_LENGTH {
            STREAM_EXCLUDED
        } else {
            &[][..]
        };
        // Safety: the buffer outlives the transfer.
        unsafe { run_paced(self.dma, &mut self.pacer, base, &clock, exclude)? };

        let words = &buffer.as_words()[PAGE_SIZE / 4..][..samples];
        bits.fill(0);
        for (index, word) in words.iter().enumerate() {
            if word & pin.mask() != 0 {
                bits[index / 8] |= 0x80 >> (index % 8);
            }
        }
        Ok(())
    }
}

/// Runs a paced chain on a channel outside `exclude`
///
/// The pacer is stopped while the channel starts, so the first data
/// request lines up with the first tick.
///
/// # Safety
///
/// The chain, and every buffer it references, must outlive the call.
pub(crate) unsafe fn run_paced<P: Pacer>(
    dma: &Dma,
    pacer: &mut P,
    control_block: PhysicalAddress,
    clock: &ClockConfig,
    exclude: &[usize],
) -> Result<()> {
    pacer.stop();
    let mut channel = dma.pick_channel(exclude).ok_or(Error::ResourceExhausted)?;
    let transfer = Transfer::start(&mut channel, control_block);
    pacer.start(clock);
    let result = transfer.wait();
    drop(transfer);
    pacer.stop();
    result
}
