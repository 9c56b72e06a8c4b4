//! DMA channel and controller register blocks
//!
//! Bit positions follow the BCM2835 ARM Peripherals manual, pages 39-55.

use ral_registers::{RORegister, RWRegister};

/// Registers for one DMA channel
///
/// The read-only registers are copies that the DMA loads from the
/// active control block.
#[repr(C)]
pub struct RegisterBlock {
    /// Control and status
    pub CS: RWRegister<u32>,
    /// Physical address of the control block to load
    pub CONBLK_AD: RWRegister<u32>,
    /// Transfer information, loaded from the control block
    pub TI: RORegister<u32>,
    /// Source address, loaded from the control block
    pub SOURCE_AD: RORegister<u32>,
    /// Destination address, loaded from the control block
    pub DEST_AD: RORegister<u32>,
    /// Transfer length, loaded from the control block
    pub TXFR_LEN: RORegister<u32>,
    /// 2D stride, loaded from the control block
    pub STRIDE: RORegister<u32>,
    /// Next control block; only safe to edit while paused
    pub NEXTCONBK: RWRegister<u32>,
    /// Debug and error flags
    pub DEBUG: RWRegister<u32>,
    _reserved: [u32; (0x100 - 0x24) / 4],
}

/// The DMA controller block: channels 0 to 14 and the global registers
#[repr(C)]
pub struct ControllerBlock {
    /// Channel register blocks, indexed by channel number
    pub CHANNELS: [RegisterBlock; CONTROLLER_CHANNELS],
    _reserved0: [u8; 0xE0],
    /// Interrupt status; bits 15:0 map to channels 15 to 0
    pub INT_STATUS: RWRegister<u32>,
    _reserved1: [u8; 0xC],
    /// Channel enable; bits 14:0 map to channels 14 to 0
    pub ENABLE: RWRegister<u32>,
}

/// Number of channels in the contiguous controller block
pub const CONTROLLER_CHANNELS: usize = 15;

/// ENABLE value with every controller channel enabled
pub const ENABLE_ALL: u32 = 0x7FFF;

/// Control and status fields
pub mod CS {
    field!(
        /// Write 1 to reset the channel
        RESET, 31, 1
    );
    field!(
        /// Write 1 to abort the current control block
        ABORT, 30, 1
    );
    field!(
        /// Don't stop when the debug pause signal is asserted
        DISDEBUG, 29, 1
    );
    field!(
        /// Defer END and INT until outstanding writes are acknowledged
        WAIT_FOR_OUTSTANDING_WRITES, 28, 1
    );
    field!(
        /// AXI panic priority; lowest value has higher priority
        PANIC_PRIORITY, 20, 4
    );
    field!(
        /// AXI priority; lowest value has higher priority
        PRIORITY, 16, 4
    );
    field!(
        /// An error was detected; see DEBUG
        ERROR, 8, 1
    );
    field!(
        /// Waiting for outstanding writes
        WAITING_FOR_OUTSTANDING_WRITES, 6, 1
    );
    field!(
        /// Paused because DREQ is inactive
        DREQ_STOPS_DMA, 5, 1
    );
    field!(
        /// Paused
        PAUSED, 4, 1
    );
    field!(
        /// State of the selected DREQ; reads 1 on unpaced transfers
        DREQ, 3, 1
    );
    field!(
        /// Interrupt status; write 1 to clear
        INT, 2, 1
    );
    field!(
        /// The current control block completed; write 1 to clear
        END, 1, 1
    );
    field!(
        /// Channel active; cleared by hardware after a zero NEXTCONBK
        ACTIVE, 0, 1
    );
}

/// Transfer information fields
///
/// Shared by the TI register and the control block's first word.
pub mod TI {
    field!(
        /// Don't do wide writes as 2 beat bursts; channels 0 to 6
        NO_WIDE_BURSTS, 26, 1
    );
    field!(
        /// Dummy cycles burnt after each read or write
        WAITS, 21, 5
    );
    field!(
        /// Peripheral whose DREQ paces the transfer; 0 is unpaced
        PERMAP, 16, 5
    );
    field!(
        /// Burst length; 0 is a single transfer
        BURST_LENGTH, 12, 4
    );
    field!(
        /// Don't read; the source reads as zeros
        SRC_IGNORE, 11, 1
    );
    field!(
        /// DREQ gates source reads
        SRC_DREQ, 10, 1
    );
    field!(
        /// 128 bit source reads
        SRC_WIDTH, 9, 1
    );
    field!(
        /// Increment the source address
        SRC_INC, 8, 1
    );
    field!(
        /// Don't write
        DEST_IGNORE, 7, 1
    );
    field!(
        /// DREQ gates destination writes
        DEST_DREQ, 6, 1
    );
    field!(
        /// 128 bit destination writes
        DEST_WIDTH, 5, 1
    );
    field!(
        /// Increment the destination address
        DEST_INC, 4, 1
    );
    field!(
        /// Wait for the AXI write response
        WAIT_RESP, 3, 1
    );
    field!(
        /// Interpret TXFR_LEN as a 2D transfer; channels 0 to 6
        TDMODE, 1, 1
    );
    field!(
        /// Interrupt when the transfer completes
        INTEN, 0, 1
    );
}

/// Transfer length fields
pub mod TXFR_LEN {
    field!(
        /// Rows, in 2D mode
        YLENGTH, 16, 14
    );
    field!(
        /// Bytes; the whole length in linear mode
        XLENGTH, 0, 30
    );
}

/// Debug fields
pub mod DEBUG {
    field!(
        /// Set on lite channels
        LITE, 28, 1
    );
    field!(
        /// Controller version
        VERSION, 25, 3
    );
    field!(
        /// Internal state machine
        DMA_STATE, 16, 9
    );
    field!(
        /// Channel index
        DMA_ID, 8, 8
    );
    field!(
        /// Outstanding AXI writes
        OUTSTANDING_WRITES, 4, 4
    );
    field!(
        /// Slave read error; write 1 to clear
        READ_ERROR, 2, 1
    );
    field!(
        /// FIFO error; write 1 to clear
        FIFO_ERROR, 1, 1
    );
    field!(
        /// The last AXI read signal was not set when expected; write 1 to clear
        READ_LAST_NOT_SET_ERROR, 0, 1
    );
}

/// The three sticky error bits in DEBUG
pub const DEBUG_ERRORS: u32 =
    DEBUG::READ_ERROR::mask | DEBUG::FIFO_ERROR::mask | DEBUG::READ_LAST_NOT_SET_ERROR::mask;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets() {
        assert_eq!(core::mem::size_of::<RegisterBlock>(), 0x100);
        assert_eq!(
            core::mem::offset_of!(ControllerBlock, INT_STATUS),
            0xFE0
        );
        assert_eq!(core::mem::offset_of!(ControllerBlock, ENABLE), 0xFF0);
        assert_eq!(core::mem::offset_of!(RegisterBlock, DEBUG), 0x20);
    }

    #[test]
    fn field_masks() {
        assert_eq!(TI::WAITS::mask, 0x1F << 21);
        assert_eq!(TI::PERMAP::mask, 0x1F << 16);
        assert_eq!(CS::PRIORITY::mask, 0xF << 16);
        assert_eq!(TXFR_LEN::XLENGTH::mask, 0x3FFF_FFFF);
        assert_eq!(DEBUG_ERRORS, 0b111);
    }
}
