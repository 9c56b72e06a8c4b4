//! Control blocks and transfer requests
//!
//! A control block is the 32 byte descriptor the DMA controller loads
//! from memory. [`ControlBlock::build`] validates a [`TransferRequest`]
//! and encodes it. Chaining is left to the caller, who knows where each
//! block lives in physical memory.

use core::fmt::{self, Display};

use crate::{
    address::{to_bus_address, to_uncached_physical, PhysicalAddress},
    ral::dma::{TI, TXFR_LEN},
    status::TransferInfo,
    Error, Result,
};

/// Maximum transfer length, in bytes, on a lite channel
pub const MAX_LITE_LENGTH: u32 = 65535;

/// Maximum wait cycles encodable in a control block
pub const MAX_WAIT_CYCLES: u8 = 31;

/// A peripheral data request line that can pace a transfer
///
/// The discriminant is the PERMAP value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Dreq {
    Dsi = 1,
    PcmTx = 2,
    PcmRx = 3,
    Smi = 4,
    Pwm = 5,
    SpiTx = 6,
    SpiRx = 7,
    BscSpiSlaveTx = 8,
    BscSpiSlaveRx = 9,
    Unused = 10,
    Emmc = 11,
    UartTx = 12,
    SdHost = 13,
    UartRx = 14,
    Dsi2 = 15,
    SlimBusMcTx = 16,
    /// Runs at 216MHz, but only while HDMI is enabled
    Hdmi = 17,
    SlimBusMcRx = 18,
    SlimBusDc0 = 19,
    SlimBusDc1 = 20,
    SlimBusDc2 = 21,
    SlimBusDc3 = 22,
    SlimBusDc4 = 23,
    /// Shared with SMI
    ScalerFifo0 = 24,
    ScalerFifo1 = 25,
    ScalerFifo2 = 26,
    SlimBusDc5 = 27,
    SlimBusDc6 = 28,
    SlimBusDc7 = 29,
    SlimBusDc8 = 30,
    SlimBusDc9 = 31,
}

impl Dreq {
    /// Decodes a PERMAP value; 0 and out of range values return `None`
    pub const fn from_raw(permap: u32) -> Option<Self> {
        use Dreq::*;
        Some(match permap {
            1 => Dsi,
            2 => PcmTx,
            3 => PcmRx,
            4 => Smi,
            5 => Pwm,
            6 => SpiTx,
            7 => SpiRx,
            8 => BscSpiSlaveTx,
            9 => BscSpiSlaveRx,
            10 => Unused,
            11 => Emmc,
            12 => UartTx,
            13 => SdHost,
            14 => UartRx,
            15 => Dsi2,
            16 => SlimBusMcTx,
            17 => Hdmi,
            18 => SlimBusMcRx,
            19 => SlimBusDc0,
            20 => SlimBusDc1,
            21 => SlimBusDc2,
            22 => SlimBusDc3,
            23 => SlimBusDc4,
            24 => ScalerFifo0,
            25 => ScalerFifo1,
            26 => ScalerFifo2,
            27 => SlimBusDc5,
            28 => SlimBusDc6,
            29 => SlimBusDc7,
            30 => SlimBusDc8,
            31 => SlimBusDc9,
            _ => return None,
        })
    }

    /// Returns the PERMAP value
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// What paces a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Unpaced; the transfer runs at full memory bandwidth
    #[default]
    Continuous,
    /// Each write waits for the peripheral's data request
    Peripheral(Dreq),
}

/// One transfer step, before encoding
///
/// Addresses are physical. A side marked as a register is translated
/// into the peripheral bus window; any other side is translated into
/// the uncached RAM alias. A missing side is ignored by the hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TransferRequest {
    /// Where to read, or `None` to read zeros
    pub source: Option<PhysicalAddress>,
    /// Where to write, or `None` to discard
    pub destination: Option<PhysicalAddress>,
    /// Transfer length in bytes
    pub length: u32,
    /// The source is a peripheral register
    pub source_is_register: bool,
    /// The destination is a peripheral register
    pub destination_is_register: bool,
    /// Advance the source after each read
    pub source_increment: bool,
    /// Advance the destination after each write
    pub destination_increment: bool,
    /// What paces the transfer
    pub pacing: Pacing,
    /// Dummy cycles after each read or write; only valid when paced
    pub wait_cycles: u8,
}

impl TransferRequest {
    /// An unpaced copy between two memory regions
    pub const fn memcpy(
        source: PhysicalAddress,
        destination: PhysicalAddress,
        length: u32,
    ) -> Self {
        TransferRequest {
            source: Some(source),
            destination: Some(destination),
            length,
            source_is_register: false,
            destination_is_register: false,
            source_increment: true,
            destination_increment: true,
            pacing: Pacing::Continuous,
            wait_cycles: 0,
        }
    }

    /// Checks every invariant without encoding anything
    pub fn validate(&self) -> Result<()> {
        if self.source_is_register && self.destination_is_register {
            return Err(Error::InvalidConfiguration(
                "only one of source and destination can be a register",
            ));
        }
        if self.source.is_none() && self.destination.is_none() {
            return Err(Error::InvalidConfiguration(
                "at least one of source or destination is required",
            ));
        }
        if self.source.is_none() && self.source_is_register {
            return Err(Error::InvalidConfiguration(
                "a register source requires a source address",
            ));
        }
        if self.destination.is_none() && self.destination_is_register {
            return Err(Error::InvalidConfiguration(
                "a register destination requires a destination address",
            ));
        }
        if self.wait_cycles > MAX_WAIT_CYCLES {
            return Err(Error::InvalidConfiguration(
                "wait cycles must be between 0 and 31",
            ));
        }
        if self.pacing == Pacing::Continuous && self.wait_cycles != 0 {
            return Err(Error::InvalidConfiguration(
                "wait cycles without a pacing peripheral",
            ));
        }
        if self.length == 0 {
            return Err(Error::InvalidConfiguration("empty transfer"));
        }
        if self.length & !TXFR_LEN::XLENGTH::mask != 0 {
            return Err(Error::InvalidConfiguration(
                "transfer length exceeds 30 bits",
            ));
        }
        Ok(())
    }
}

/// A hardware control block
///
/// The layout is fixed by the DMA controller: 32 bytes, 32 byte aligned.
/// A zero `next` ends the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C, align(32))]
pub struct ControlBlock {
    /// Transfer information
    pub transfer_info: TransferInfo,
    /// Source bus address
    pub source: u32,
    /// Destination bus address
    pub destination: u32,
    /// Transfer length in bytes
    pub length: u32,
    /// 2D stride; unused in linear mode
    pub stride: u32,
    /// Physical address of the next control block, or 0
    pub next: u32,
    _reserved: [u32; 2],
}

impl ControlBlock {
    /// Size of a control block in bytes
    pub const SIZE: usize = 32;

    /// Validates `request` and encodes it into a control block
    ///
    /// The block's `next` pointer is zero, so it terminates a chain
    /// until the caller links it.
    pub fn build(request: &TransferRequest) -> Result<Self> {
        request.validate()?;

        let mut ti = TI::NO_WIDE_BURSTS::mask | TI::WAIT_RESP::mask;
        let source = match request.source {
            None => {
                ti |= TI::SRC_IGNORE::mask;
                0
            }
            Some(addr) => {
                if request.source_increment {
                    ti |= TI::SRC_INC::mask;
                }
                translate(addr, request.source_is_register)
            }
        };
        let destination = match request.destination {
            None => {
                ti |= TI::DEST_IGNORE::mask;
                0
            }
            Some(addr) => {
                if request.destination_increment {
                    ti |= TI::DEST_INC::mask;
                }
                translate(addr, request.destination_is_register)
            }
        };
        if let Pacing::Peripheral(dreq) = request.pacing {
            ti |= TI::DEST_DREQ::mask
                | ((dreq.raw() << TI::PERMAP::offset) & TI::PERMAP::mask)
                | ((u32::from(request.wait_cycles) << TI::WAITS::offset) & TI::WAITS::mask);
        }

        Ok(ControlBlock {
            transfer_info: TransferInfo(ti),
            source,
            destination,
            length: request.length,
            stride: 0,
            next: 0,
            _reserved: [0; 2],
        })
    }

    /// Returns `true` if a lite channel can run this block
    pub const fn fits_lite(&self) -> bool {
        self.length <= MAX_LITE_LENGTH
    }

    /// Returns `true` if this block ends its chain
    pub const fn is_last(&self) -> bool {
        self.next == 0
    }
}

fn translate(addr: PhysicalAddress, is_register: bool) -> u32 {
    if is_register {
        to_bus_address(addr).raw()
    } else {
        to_uncached_physical(addr).raw()
    }
}

impl Display for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{transfer_info: {}, source: {:#x}, destination: {:#x}, length: {}, stride: {:#x}, next: {:#x}}}",
            self.transfer_info, self.source, self.destination, self.length, self.stride, self.next
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPIO_SET: PhysicalAddress = PhysicalAddress(0x3F20_001C);
    const MEMORY: PhysicalAddress = PhysicalAddress(0x0010_0000);

    fn to_register() -> TransferRequest {
        TransferRequest {
            source: Some(MEMORY),
            destination: Some(GPIO_SET),
            length: 16,
            destination_is_register: true,
            pacing: Pacing::Peripheral(Dreq::Pwm),
            ..Default::default()
        }
    }

    #[test]
    fn layout() {
        assert_eq!(core::mem::size_of::<ControlBlock>(), ControlBlock::SIZE);
        assert_eq!(core::mem::align_of::<ControlBlock>(), 32);
    }

    #[test]
    fn both_sides_registers() {
        let request = TransferRequest {
            source_is_register: true,
            ..to_register()
        };
        assert!(matches!(
            ControlBlock::build(&request),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn neither_side_present() {
        let request = TransferRequest {
            source: None,
            destination: None,
            destination_is_register: false,
            ..to_register()
        };
        assert!(matches!(
            ControlBlock::build(&request),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn register_side_without_address() {
        let request = TransferRequest {
            destination: None,
            ..to_register()
        };
        assert!(matches!(
            ControlBlock::build(&request),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn wait_cycles_range() {
        for wait_cycles in [32u8, 100, 255] {
            let request = TransferRequest {
                wait_cycles,
                ..to_register()
            };
            assert!(matches!(
                ControlBlock::build(&request),
                Err(Error::InvalidConfiguration(_))
            ));
        }
        let request = TransferRequest {
            wait_cycles: 31,
            ..to_register()
        };
        let cb = ControlBlock::build(&request).unwrap();
        assert_eq!(cb.transfer_info.waits(), 31);
    }

    #[test]
    fn continuous_rejects_wait_cycles() {
        let request = TransferRequest {
            wait_cycles: 1,
            ..TransferRequest::memcpy(MEMORY, MEMORY.offset(4096), 64)
        };
        assert!(matches!(
            ControlBlock::build(&request),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn length_limits() {
        let zero = TransferRequest::memcpy(MEMORY, MEMORY.offset(4096), 0);
        assert!(ControlBlock::build(&zero).is_err());
        let huge = TransferRequest::memcpy(MEMORY, MEMORY.offset(4096), 1 << 30);
        assert!(ControlBlock::build(&huge).is_err());
    }

    #[test]
    fn memory_to_register() {
        let cb = ControlBlock::build(&to_register()).unwrap();
        let ti = cb.transfer_info;
        assert!(ti.contains(TI::NO_WIDE_BURSTS::mask | TI::WAIT_RESP::mask | TI::DEST_DREQ::mask));
        assert!(!ti.contains(TI::SRC_INC::mask));
        assert!(!ti.contains(TI::DEST_INC::mask));
        assert_eq!(ti.permap(), Dreq::Pwm.raw());
        assert_eq!(cb.source, 0xC010_0000);
        assert_eq!(cb.destination, 0x7E20_001C);
        assert_eq!(cb.length, 16);
        assert_eq!(cb.stride, 0);
        assert!(cb.is_last());
    }

    #[test]
    fn memcpy_is_unpaced() {
        let request = TransferRequest::memcpy(MEMORY, MEMORY.offset(8192), 100);
        let cb = ControlBlock::build(&request).unwrap();
        assert_eq!(
            cb.transfer_info.0,
            TI::NO_WIDE_BURSTS::mask | TI::WAIT_RESP::mask | TI::SRC_INC::mask | TI::DEST_INC::mask
        );
        assert_eq!(cb.destination, 0xC010_2000);
    }

    #[test]
    fn absent_side_is_ignored() {
        let request = TransferRequest {
            source: None,
            source_increment: true,
            ..to_register()
        };
        let cb = ControlBlock::build(&request).unwrap();
        assert!(cb.transfer_info.contains(TI::SRC_IGNORE::mask));
        assert!(!cb.transfer_info.contains(TI::SRC_INC::mask));
        assert_eq!(cb.source, 0);
    }

    #[test]
    fn lite_ceiling() {
        let request = TransferRequest::memcpy(MEMORY, MEMORY, MAX_LITE_LENGTH);
        let mut cb = ControlBlock::build(&request).unwrap();
        assert!(cb.fits_lite());
        cb.length += 1;
        assert!(!cb.fits_lite());
    }

    #[test]
    fn dreq_round_trip() {
        assert_eq!(Dreq::from_raw(0), None);
        assert_eq!(Dreq::from_raw(32), None);
        assert_eq!(Dreq::from_raw(5), Some(Dreq::Pwm));
        assert_eq!(Dreq::from_raw(31), Some(Dreq::SlimBusDc9));
    }
}
