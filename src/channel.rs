//! DMA channel

use core::sync::atomic;

use crate::{
    address::PhysicalAddress,
    error::{DebugStatus, Fault},
    ral::{self, dma, Static},
    status::Status,
    Dma, Error, Result,
};

/// Channels 7 to 15 are lite: half the bandwidth, 16 bit lengths, no 2D mode
pub const LITE_CHANNELS: &[usize] = &[7, 8, 9, 10, 11, 12, 13, 14, 15];

/// Channel 6 and the lite channels; excluded when a paced stream needs
/// a full bandwidth channel
pub const STREAM_EXCLUDED: &[usize] = &[6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// The lifecycle state of a channel, as read from its registers
///
/// A faulted channel stays faulted after [`Channel::reset`]. Only
/// [`Channel::clear_faults`] clears the debug error bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// No control block, nothing running
    Idle,
    /// A control block address is loaded, but the channel isn't active
    Configured,
    /// Transferring
    Active,
    /// The chain finished
    Completed,
    /// A debug error bit is set
    Faulted(Fault),
}

/// A DMA channel
///
/// Use [`Dma::pick_channel`] to acquire an idle channel. A `Channel` is the
/// single in-process owner of its hardware channel. Dropping it resets the
/// hardware and releases the claim.
///
/// The `Channel` stores control block addresses independent of the memory
/// lifetime. You must make sure that the chain outlives the transfer!
pub struct Channel<'a> {
    /// Our channel number, between 0 and 15
    index: usize,
    /// Reference to the channel's registers
    registers: Static<dma::RegisterBlock>,
    /// The driver that tracks our claim
    dma: &'a Dma,
}

impl<'a> Channel<'a> {
    pub(crate) fn new(index: usize, registers: Static<dma::RegisterBlock>, dma: &'a Dma) -> Self {
        Channel {
            index,
            registers,
            dma,
        }
    }

    /// Returns the DMA channel number
    pub fn channel(&self) -> usize {
        self.index
    }

    /// Returns the control and status register
    pub fn status(&self) -> Status {
        Status(ral::read_reg!(ral::dma, self.registers, CS))
    }

    /// Returns the debug register
    pub fn debug(&self) -> DebugStatus {
        DebugStatus::new(ral::read_reg!(ral::dma, self.registers, DEBUG))
    }

    /// Returns the address of the control block being executed, or 0
    pub fn control_block_address(&self) -> u32 {
        ral::read_reg!(ral::dma, self.registers, CONBLK_AD)
    }

    /// Returns `true` if this is a lite channel
    pub fn is_lite(&self) -> bool {
        self.debug().is_lite()
    }

    /// Returns `true` if nothing is loaded in the channel
    ///
    /// The DREQ bit is ignored; it reflects the pacing peripheral.
    pub fn is_available(&self) -> bool {
        available(&self.registers)
    }

    /// Indicates if this DMA channel is actively transferring data
    pub fn is_active(&self) -> bool {
        ral::read_reg!(ral::dma, self.registers, CS, ACTIVE == 1)
    }

    /// Reads the channel's lifecycle state
    pub fn state(&self) -> ChannelState {
        if let Some(fault) = self.debug().fault() {
            return ChannelState::Faulted(fault);
        }
        let status = self.status();
        if status.is_active() {
            ChannelState::Active
        } else if status.is_end() {
            ChannelState::Completed
        } else if self.control_block_address() != 0 {
            ChannelState::Configured
        } else {
            ChannelState::Idle
        }
    }

    /// Reset the channel
    ///
    /// Stops any transfer immediately and clears the control block
    /// address. The debug error bits are not cleared.
    pub fn reset(&mut self) {
        log::trace!("reset({}): {}", self.index, self.status());
        reset(&self.registers);
        let debug = self.debug();
        if let Some(fault) = debug.fault() {
            log::warn!("channel {} still reports a {fault} after reset", self.index);
        }
    }

    /// Clears the sticky debug error bits
    pub fn clear_faults(&mut self) {
        ral::write_reg!(ral::dma, self.registers, DEBUG, dma::DEBUG_ERRORS);
    }

    /// Start executing the control block chain at `control_block`
    ///
    /// The channel should be reset or freshly picked. Completion is
    /// deferred until all outstanding writes are acknowledged.
    ///
    /// # Safety
    ///
    /// This could initiate a DMA transaction that uses an invalid source or
    /// destination. Caller must ensure that the control block chain, and every
    /// buffer it references, stays allocated and in place until the channel
    /// is no longer active.
    pub unsafe fn start(&mut self, control_block: PhysicalAddress) {
        // Control blocks were written with normal stores.
        atomic::fence(atomic::Ordering::SeqCst);
        ral::write_reg!(ral::dma, self.registers, CONBLK_AD, control_block.raw());
        ral::write_reg!(ral::dma, self.registers, CS, Status::START.0);
        log::trace!("start({}): {:#x}", self.index, control_block.raw());
    }

    /// Busy-wait until the channel is no longer active, or faults
    ///
    /// A fault is reported as soon as it appears, even while the channel
    /// is still active. There's no timeout. The channel must be reset
    /// afterwards in all cases.
    pub fn wait(&self) -> Result<()> {
        loop {
            // ACTIVE first: a fault that stops the channel is latched
            // before ACTIVE clears.
            let active = self.is_active();
            if let Some(result) = outcome(active, self.debug()) {
                atomic::fence(atomic::Ordering::SeqCst);
                return result;
            }
            core::hint::spin_loop();
        }
    }
}

impl Drop for Channel<'_> {
    fn drop(&mut self) {
        self.reset();
        self.dma.release(self.index);
    }
}

// It's OK to send a channel across an execution context.
// They can't be cloned or copied, and the claim prevents
// a second handle within this process.
unsafe impl Send for Channel<'_> {}

pub(crate) fn available(registers: &dma::RegisterBlock) -> bool {
    Status(ral::read_reg!(ral::dma, registers, CS)).is_clear()
        && ral::read_reg!(ral::dma, registers, CONBLK_AD) == 0
}

/// What [`Channel::wait`] returns, given ACTIVE and the debug register
/// read after it; `None` keeps waiting
fn outcome(active: bool, debug: DebugStatus) -> Option<Result<()>> {
    match debug.fault() {
        Some(fault) => Some(Err(Error::hardware(fault, debug))),
        None if !active => Some(Ok(())),
        None => None,
    }
}

fn reset(registers: &dma::RegisterBlock) {
    ral::write_reg!(ral::dma, registers, CS, RESET: 1);
    ral::write_reg!(ral::dma, registers, CONBLK_AD, 0);
}
