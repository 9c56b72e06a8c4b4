//! Raw register values with field accessors
//!
//! These are plain `u32` wrappers. They hold no hidden state, so they
//! can be built from a register read, a control block, or a test.

use core::fmt::{self, Display};

use crate::ral::dma::{CS, TI};

/// A snapshot of a channel's control and status register
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Status(pub u32);

impl Status {
    /// The value `start` writes: wait for outstanding writes, both
    /// priorities at 8, and active
    pub const START: Status = Status(
        CS::WAIT_FOR_OUTSTANDING_WRITES::mask
            | (8u32 << CS::PANIC_PRIORITY::offset)
            | (8u32 << CS::PRIORITY::offset)
            | CS::ACTIVE::mask,
    );

    /// Returns `true` if the channel is running
    pub const fn is_active(self) -> bool {
        self.0 & CS::ACTIVE::mask != 0
    }
    /// Returns `true` if the last control block completed
    pub const fn is_end(self) -> bool {
        self.0 & CS::END::mask != 0
    }
    /// Returns `true` if the error flag is set
    pub const fn is_error(self) -> bool {
        self.0 & CS::ERROR::mask != 0
    }
    /// Returns `true` if no bit other than DREQ is set
    ///
    /// DREQ reflects the selected peripheral, not the channel.
    pub const fn is_clear(self) -> bool {
        self.0 & !CS::DREQ::mask == 0
    }
    /// AXI priority
    pub const fn priority(self) -> u32 {
        (self.0 & CS::PRIORITY::mask) >> CS::PRIORITY::offset
    }
    /// AXI panic priority
    pub const fn panic_priority(self) -> u32 {
        (self.0 & CS::PANIC_PRIORITY::mask) >> CS::PANIC_PRIORITY::offset
    }
}

const STATUS_FLAGS: &[(u32, &str)] = &[
    (CS::RESET::mask, "Reset"),
    (CS::ABORT::mask, "Abort"),
    (CS::DISDEBUG::mask, "DisableDebug"),
    (CS::WAIT_FOR_OUTSTANDING_WRITES::mask, "WaitForOutstandingWrites"),
    (CS::ERROR::mask, "Error"),
    (CS::WAITING_FOR_OUTSTANDING_WRITES::mask, "WaitingForOutstandingWrites"),
    (CS::DREQ_STOPS_DMA::mask, "DreqStopsDMA"),
    (CS::PAUSED::mask, "Paused"),
    (CS::DREQ::mask, "Dreq"),
    (CS::INT::mask, "Interrupt"),
    (CS::END::mask, "End"),
    (CS::ACTIVE::mask, "Active"),
];

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = Separator::default();
        for (mask, name) in STATUS_FLAGS {
            if self.0 & mask != 0 {
                sep.write(f)?;
                f.write_str(name)?;
            }
        }
        if self.panic_priority() != 0 {
            sep.write(f)?;
            write!(f, "pp{}", self.panic_priority())?;
        }
        if self.priority() != 0 {
            sep.write(f)?;
            write!(f, "p{}", self.priority())?;
        }
        if !sep.started {
            f.write_str("0")?;
        }
        Ok(())
    }
}

/// A transfer information word
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct TransferInfo(pub u32);

impl TransferInfo {
    /// Returns `true` if every bit in `mask` is set
    pub const fn contains(self, mask: u32) -> bool {
        self.0 & mask == mask
    }
    /// Returns the pacing peripheral number; 0 is unpaced
    pub const fn permap(self) -> u32 {
        (self.0 & TI::PERMAP::mask) >> TI::PERMAP::offset
    }
    /// Returns the wait cycles after each read or write
    pub const fn waits(self) -> u32 {
        (self.0 & TI::WAITS::mask) >> TI::WAITS::offset
    }
    /// Returns the burst length
    pub const fn burst_length(self) -> u32 {
        (self.0 & TI::BURST_LENGTH::mask) >> TI::BURST_LENGTH::offset
    }
}

const TRANSFER_INFO_FLAGS: &[(u32, &str)] = &[
    (TI::NO_WIDE_BURSTS::mask, "NoWideBursts"),
    (TI::SRC_IGNORE::mask, "SrcIgnore"),
    (TI::SRC_DREQ::mask, "SrcDReq"),
    (TI::SRC_WIDTH::mask, "SrcWidth128"),
    (TI::SRC_INC::mask, "SrcInc"),
    (TI::DEST_IGNORE::mask, "DstIgnore"),
    (TI::DEST_DREQ::mask, "DstDReq"),
    (TI::DEST_WIDTH::mask, "DstWidth128"),
    (TI::DEST_INC::mask, "DstInc"),
    (TI::WAIT_RESP::mask, "WaitResp"),
    (TI::TDMODE::mask, "Transfer2DMode"),
    (TI::INTEN::mask, "InterruptEnable"),
];

impl Display for TransferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = Separator::default();
        for (mask, name) in TRANSFER_INFO_FLAGS {
            if self.0 & mask != 0 {
                sep.write(f)?;
                f.write_str(name)?;
            }
        }
        if self.waits() != 0 {
            sep.write(f)?;
            write!(f, "waits={}", self.waits())?;
        }
        if self.burst_length() != 0 {
            sep.write(f)?;
            write!(f, "burst={}", self.burst_length())?;
        }
        sep.write(f)?;
        match crate::control_block::Dreq::from_raw(self.permap()) {
            Some(dreq) => write!(f, "{dreq:?}"),
            None => f.write_str("Fire"),
        }
    }
}

#[derive(Default)]
struct Separator {
    started: bool,
}

impl Separator {
    fn write(&mut self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.started {
            f.write_str("|")?;
        }
        self.started = true;
        Ok(())
    }
}
