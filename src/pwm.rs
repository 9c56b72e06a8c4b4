//! PWM by DMA
//!
//! Two control blocks point at each other. The first sets the pin and
//! holds it for `duty` ticks, the second clears it for the rest of the
//! period. The channel runs until it's stopped.

use crate::{
    address::PAGE_SIZE,
    control_block::{ControlBlock, Pacing, TransferRequest, MAX_LITE_LENGTH},
    gpio::{Gpio, Pin},
    memory::{Allocator, DmaBuffer},
    stream::{allocate, PACING_DREQ},
    Channel, Dma, Error, Result, LITE_CHANNELS,
};

/// Byte offset of the mask word, after both control blocks
const MASK_OFFSET: usize = 2 * ControlBlock::SIZE;

/// A pin toggled by a looping DMA channel
///
/// The pacing clock must already run; each tick is one data request.
/// Dropping the `Pwm` stops it.
pub struct Pwm<'d, B: DmaBuffer> {
    // Declared first, so the channel resets before the buffer is released.
    channel: Channel<'d>,
    buffer: B,
    range: u32,
    duty: u32,
}

impl<'d, B: DmaBuffer> Pwm<'d, B> {
    /// Drives `pin` high for `duty` out of every `range` ticks
    ///
    /// `duty` must be between 1 and `range - 1`. Use the GPIO directly for
    /// a constant level.
    pub fn start<A>(
        dma: &'d Dma,
        allocator: &A,
        gpio: Gpio,
        pin: Pin,
        range: u32,
        duty: u32,
    ) -> Result<Self>
    where
        A: Allocator<Buffer = B>,
    {
        if duty == 0 || duty >= range {
            return Err(Error::InvalidConfiguration(
                "duty must be between 1 and range - 1",
            ));
        }
        let high = duty
            .checked_mul(4)
            .ok_or(Error::InvalidConfiguration("range is too large"))?;
        let low = (range - duty)
            .checked_mul(4)
            .ok_or(Error::InvalidConfiguration("range is too large"))?;

        let mut buffer = allocate(allocator, PAGE_SIZE)?;
        let base = buffer.physical_address();
        let mask = base.offset(MASK_OFFSET as u32);
        buffer.as_words_mut()[MASK_OFFSET / 4] = pin.mask();

        let block = |level: bool, length: u32| {
            ControlBlock::build(&TransferRequest {
                source: Some(mask),
                destination: Some(gpio.level_target(pin, level)),
                length,
                destination_is_register: true,
                pacing: Pacing::Peripheral(PACING_DREQ),
                ..Default::default()
            })
        };
        let mut set = block(true, high)?;
        let mut clear = block(false, low)?;
        set.next = base.offset(ControlBlock::SIZE as u32).raw();
        clear.next = base.raw();
        let fits_lite = set.fits_lite() && clear.fits_lite();
        let blocks = buffer.as_control_blocks_mut();
        blocks[0] = set;
        blocks[1] = clear;

        let exclude = if fits_lite { &[][..] } else { LITE_CHANNELS };
        let mut channel = dma.pick_channel(exclude).ok_or(Error::ResourceExhausted)?;
        // Safety: the buffer lives in self, next to the channel, and the
        // channel resets first on drop.
        unsafe { channel.start(base) };
        log::debug!(
            "PWM on GPIO{} at {duty}/{range}, channel {}",
            pin.number(),
            channel.channel()
        );
        Ok(Pwm {
            channel,
            buffer,
            range,
            duty,
        })
    }

    /// Returns the channel running the loop
    pub fn channel(&self) -> &Channel<'d> {
        &self.channel
    }

    /// Ticks per period
    pub fn range(&self) -> u32 {
        self.range
    }

    /// Ticks per period spent high
    pub fn duty(&self) -> u32 {
        self.duty
    }

    /// The two looping control blocks
    pub fn control_blocks(&self) -> &[ControlBlock] {
        &self.buffer.as_control_blocks()[..2]
    }

    /// Stops the loop and releases the channel
    ///
    /// The pin keeps whatever level it had.
    pub fn stop(self) {}
}

/// Upper bound for `range` on lite channels
pub const MAX_LITE_RANGE: u32 = MAX_LITE_LENGTH / 4;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::PhysicalAddress,
        mock::{MockAllocator, MockController},
    };

    const GPIO: Gpio = Gpio::new(PhysicalAddress(0x3F20_0000));

    #[test]
    fn rejects_degenerate_duty() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        let allocator = MockAllocator::new();
        let pin = Pin::new(4).unwrap();
        for (range, duty) in [(10, 0), (10, 10), (10, 11)] {
            assert!(matches!(
                Pwm::start(&dma, &allocator, GPIO, pin, range, duty),
                Err(Error::InvalidConfiguration(_))
            ));
        }
        assert_eq!(allocator.live_buffers(), 0);
    }

    #[test]
    fn loops_between_two_blocks() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        let allocator = MockAllocator::new();
        let pwm = Pwm::start(&dma, &allocator, GPIO, Pin::new(4).unwrap(), 10, 3).unwrap();

        let blocks = pwm.control_blocks();
        let base = controller.read(pwm.channel().channel(), crate::mock::Register::ConblkAd);
        assert_eq!(blocks[0].destination, 0x7E20_001C);
        assert_eq!(blocks[0].length, 12);
        assert_eq!(blocks[0].next, base + 32);
        assert_eq!(blocks[1].destination, 0x7E20_0028);
        assert_eq!(blocks[1].length, 28);
        assert_eq!(blocks[1].next, base);
        assert_eq!(blocks[0].source, blocks[1].source);
        // Any channel will do, lite ones first.
        assert_eq!(pwm.channel().channel(), 14);
        assert!(pwm.channel().is_active());
    }

    #[test]
    fn long_periods_need_full_channels() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        let allocator = MockAllocator::new();
        let pin = Pin::new(4).unwrap();
        let pwm = Pwm::start(&dma, &allocator, GPIO, pin, MAX_LITE_RANGE * 2, 1).unwrap();
        assert_eq!(pwm.channel().channel(), 6);
    }

    #[test]
    fn stop_resets_before_release() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        let allocator = MockAllocator::new();
        let pwm = Pwm::start(&dma, &allocator, GPIO, Pin::new(4).unwrap(), 10, 5).unwrap();
        let index = pwm.channel().channel();
        pwm.stop();
        assert_eq!(controller.read(index, crate::mock::Register::ConblkAd), 0);
        assert_eq!(allocator.live_buffers(), 0);
        controller.settle();
        assert_eq!(controller.read(index, crate::mock::Register::Cs), 0);
    }
}
