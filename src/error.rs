//! DMA errors

use core::fmt::{self, Debug, Display};

use crate::ral::dma::DEBUG;

/// A wrapper around a DMA channel's debug register
///
/// The wrapper contains a copy of the channel's DEBUG register at the
/// point of an error. The wrapper implements both `Debug` and `Display`.
/// Print it to understand why the channel faulted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DebugStatus {
    /// The raw debug register
    debug: u32,
}

impl DebugStatus {
    pub(crate) const fn new(debug: u32) -> Self {
        DebugStatus { debug }
    }
    /// Returns the raw debug register value
    pub const fn raw(self) -> u32 {
        self.debug
    }
    /// Returns `true` if the channel is a lite channel
    pub const fn is_lite(self) -> bool {
        self.debug & DEBUG::LITE::mask != 0
    }
    /// Returns the first fault flagged in the register
    ///
    /// Read errors take precedence over FIFO errors, which take
    /// precedence over read-last-not-set errors.
    pub const fn fault(self) -> Option<Fault> {
        if self.debug & DEBUG::READ_ERROR::mask != 0 {
            Some(Fault::ReadError)
        } else if self.debug & DEBUG::FIFO_ERROR::mask != 0 {
            Some(Fault::FifoError)
        } else if self.debug & DEBUG::READ_LAST_NOT_SET_ERROR::mask != 0 {
            Some(Fault::ReadLastNotSetError)
        } else {
            None
        }
    }
}

impl Debug for DebugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DMA_DEBUG({:#010X})", self.debug)
    }
}

impl Display for DebugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |mask: u32, offset: u32| (self.debug & mask) >> offset;
        write!(f,
            "DMA_DEBUG: LITE {lite} VERSION {version} STATE {state:#X} ID {id} OUTSTANDING {writes} READ_ERROR {read} FIFO_ERROR {fifo} READ_LAST_NOT_SET {last}",
            lite = field(DEBUG::LITE::mask, DEBUG::LITE::offset),
            version = field(DEBUG::VERSION::mask, DEBUG::VERSION::offset),
            state = field(DEBUG::DMA_STATE::mask, DEBUG::DMA_STATE::offset),
            id = field(DEBUG::DMA_ID::mask, DEBUG::DMA_ID::offset),
            writes = field(DEBUG::OUTSTANDING_WRITES::mask, DEBUG::OUTSTANDING_WRITES::offset),
            read = field(DEBUG::READ_ERROR::mask, DEBUG::READ_ERROR::offset),
            fifo = field(DEBUG::FIFO_ERROR::mask, DEBUG::FIFO_ERROR::offset),
            last = field(
                DEBUG::READ_LAST_NOT_SET_ERROR::mask,
                DEBUG::READ_LAST_NOT_SET_ERROR::offset,
            ),
        )
    }
}

/// A fault latched in a channel's debug register
///
/// Faults are sticky. Resetting the channel does not clear them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Slave read error
    ReadError,
    /// FIFO error
    FifoError,
    /// The last AXI read signal was not set when expected
    ReadLastNotSetError,
}

impl Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Fault::ReadError => "read error",
            Fault::FifoError => "FIFO error",
            Fault::ReadLastNotSetError => "AXI read-last-not-set error",
        })
    }
}

/// DMA driver errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The request violates a transfer invariant
    ///
    /// Raised before any register is touched.
    #[error("invalid DMA configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// No idle channel is available right now
    #[error("no DMA channel available")]
    ResourceExhausted,
    /// The channel reported a fault in its debug register
    #[error("DMA {fault} ({debug:?})")]
    HardwareFault {
        /// The highest priority fault
        fault: Fault,
        /// The debug register when the fault was observed
        debug: DebugStatus,
    },
    /// The pacing clock can't run at exactly the requested rate
    #[error("requested {requested_hz} Hz but the clock can only do {actual_hz} Hz")]
    OversamplingUnsupported {
        /// Requested frequency
        requested_hz: u64,
        /// Best achievable frequency
        actual_hz: u64,
    },
    /// No clock source can approximate the requested frequency
    #[error("no clock source can generate {requested_hz} Hz")]
    NoSuitableClockSource {
        /// Requested frequency
        requested_hz: u64,
    },
    /// The operation exists upstream but has no defined behavior yet
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    /// The physical memory allocator could not provide a buffer
    #[error("failed to allocate {size} bytes of DMA memory")]
    AllocationFailed {
        /// Requested size, in bytes
        size: usize,
    },
    /// The DMA controller doesn't look like the expected hardware
    #[error("unexpected hardware: {0}")]
    UnexpectedHardware(&'static str),
    /// A verified copy produced different bytes
    #[error("DMA copy mismatch at byte {offset}")]
    CopyMismatch {
        /// First differing byte
        offset: usize,
    },
}

impl Error {
    pub(crate) const fn hardware(fault: Fault, debug: DebugStatus) -> Self {
        Error::HardwareFault { fault, debug }
    }
}
