//! GPIO registers as DMA targets
//!
//! Pin modes are configured elsewhere. The DMA driver only needs to know
//! where a pin's set, clear and level registers are.

use crate::address::PhysicalAddress;

/// GPSET0; one register per bank of 32 pins
const SET_OFFSET: u32 = 0x1C;
/// GPCLR0
const CLEAR_OFFSET: u32 = 0x28;
/// GPLEV0
const LEVEL_OFFSET: u32 = 0x34;

/// Highest GPIO number on the BCM283x
pub const MAX_PIN: u8 = 53;

/// The GPIO controller, identified by its physical base address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gpio {
    base: PhysicalAddress,
}

impl Gpio {
    /// Describes a GPIO controller at `base`
    pub const fn new(base: PhysicalAddress) -> Self {
        Gpio { base }
    }

    /// Returns the register that drives `pin` high when its bit is written
    pub const fn set_register(&self, pin: Pin) -> PhysicalAddress {
        self.base.offset(SET_OFFSET + 4 * pin.bank())
    }

    /// Returns the register that drives `pin` low when its bit is written
    pub const fn clear_register(&self, pin: Pin) -> PhysicalAddress {
        self.base.offset(CLEAR_OFFSET + 4 * pin.bank())
    }

    /// Returns the register that reads back `pin`'s level
    pub const fn level_register(&self, pin: Pin) -> PhysicalAddress {
        self.base.offset(LEVEL_OFFSET + 4 * pin.bank())
    }

    /// Returns the register that drives `pin` to `level`
    pub const fn level_target(&self, pin: Pin, level: bool) -> PhysicalAddress {
        if level {
            self.set_register(pin)
        } else {
            self.clear_register(pin)
        }
    }
}

/// A GPIO pin number
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pin(u8);

impl Pin {
    /// Returns the pin, or `None` if `number` isn't a GPIO on this chip
    pub const fn new(number: u8) -> Option<Self> {
        if number <= MAX_PIN {
            Some(Pin(number))
        } else {
            None
        }
    }

    /// Returns the GPIO number
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Returns the pin's bit within its bank's registers
    pub const fn mask(self) -> u32 {
        1 << (self.0 & 31)
    }

    const fn bank(self) -> u32 {
        self.0 as u32 / 32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPIO: Gpio = Gpio::new(PhysicalAddress(0x3F20_0000));

    #[test]
    fn bank_zero() {
        let pin = Pin::new(18).unwrap();
        assert_eq!(pin.mask(), 1 << 18);
        assert_eq!(GPIO.set_register(pin), PhysicalAddress(0x3F20_001C));
        assert_eq!(GPIO.clear_register(pin), PhysicalAddress(0x3F20_0028));
        assert_eq!(GPIO.level_register(pin), PhysicalAddress(0x3F20_0034));
    }

    #[test]
    fn bank_one() {
        let pin = Pin::new(40).unwrap();
        assert_eq!(pin.mask(), 1 << 8);
        assert_eq!(GPIO.set_register(pin), PhysicalAddress(0x3F20_0020));
        assert_eq!(GPIO.level_target(pin, false), PhysicalAddress(0x3F20_002C));
    }

    #[test]
    fn out_of_range() {
        assert!(Pin::new(53).is_some());
        assert!(Pin::new(54).is_none());
    }
}
