//! Processor variants and peripheral block locations

use crate::{address::PhysicalAddress, gpio::Gpio, pcm::Pcm};

/// DMA channels 0 to 14, relative to the peripheral base
pub const DMA_OFFSET: u32 = 0x7000;
/// DMA channel 15, relative to the peripheral base
pub const DMA_CHANNEL15_OFFSET: u32 = 0xE0_5000;
/// System timer
pub const TIMER_OFFSET: u32 = 0x3000;
/// Clock manager
pub const CLOCK_OFFSET: u32 = 0x10_1000;
/// GPIO controller
pub const GPIO_OFFSET: u32 = 0x20_0000;
/// PCM / I2S
pub const PCM_OFFSET: u32 = 0x20_3000;
/// PWM
pub const PWM_OFFSET: u32 = 0x20_C000;

/// Bytes to map for the DMA controller block
pub(crate) const DMA_BLOCK_SIZE: usize = 0x1000;
/// Bytes to map for a single channel
pub(crate) const CHANNEL_BLOCK_SIZE: usize = 0x100;

/// A BCM283x processor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Soc {
    /// Raspberry Pi 1 and Zero
    Bcm2835,
    /// Raspberry Pi 2
    Bcm2836,
    /// Raspberry Pi 3
    Bcm2837,
}

impl Soc {
    /// Physical base address of the peripheral window
    pub const fn peripheral_base(self) -> PhysicalAddress {
        match self {
            Soc::Bcm2835 => PhysicalAddress(0x2000_0000),
            Soc::Bcm2836 | Soc::Bcm2837 => PhysicalAddress(0x3F00_0000),
        }
    }

    /// DMA channels 0 to 14
    pub const fn dma(self) -> PhysicalAddress {
        self.peripheral_base().offset(DMA_OFFSET)
    }

    /// DMA channel 15
    pub const fn dma_channel15(self) -> PhysicalAddress {
        self.peripheral_base().offset(DMA_CHANNEL15_OFFSET)
    }

    /// PWM block
    pub const fn pwm(self) -> PhysicalAddress {
        self.peripheral_base().offset(PWM_OFFSET)
    }

    /// PCM block
    pub const fn pcm(self) -> Pcm {
        Pcm::new(self.peripheral_base().offset(PCM_OFFSET))
    }

    /// Clock manager
    pub const fn clock_manager(self) -> PhysicalAddress {
        self.peripheral_base().offset(CLOCK_OFFSET)
    }

    /// System timer
    pub const fn timer(self) -> PhysicalAddress {
        self.peripheral_base().offset(TIMER_OFFSET)
    }

    /// GPIO controller
    pub const fn gpio(self) -> Gpio {
        Gpio::new(self.peripheral_base().offset(GPIO_OFFSET))
    }
}

/// Maps physical register blocks into this process
///
/// On Linux this is usually an `mmap` of `/dev/mem` or `/dev/gpiomem`.
///
/// # Safety
///
/// `map` must return a pointer to at least `len` bytes of device memory
/// backed by `base`, and the mapping must stay valid for as long as any
/// driver built on it exists.
pub unsafe trait Mapper {
    /// Why mapping failed
    type Error;

    /// Maps `len` bytes starting at `base`
    fn map(&mut self, base: PhysicalAddress, len: usize) -> Result<*const (), Self::Error>;
}
