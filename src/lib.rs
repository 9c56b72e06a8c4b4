//! Direct Memory Access (DMA) driver for BCM283x processors
//!
//! `bcm283x-dma` provides
//!
//! - a [`Dma`] driver object that owns the mapped channel registers and hands
//!   out idle [`Channel`]s
//! - control block encoding, with the address translations the DMA
//!   controller needs for RAM and peripheral registers
//! - GPIO bit streaming, either as run-length coalesced control block chains
//!   ([`stream`]) or as raster buffers ([`raster`])
//! - PCM streaming, with the bits shifted out by the PCM block ([`pcm`])
//! - PWM by DMA ([`pwm`]) and a DMA-powered memcpy ([`memcpy`])
//!
//! The driver is `no_std`. It doesn't map registers or allocate physical
//! memory itself; you provide a [`Mapper`] and an [`Allocator`].
//!
//! # Portability
//!
//! This DMA driver works across the BCM2835, BCM2836 and BCM2837. The
//! peripheral base differs, see [`Soc`]. Channels 0 through 6 are full
//! bandwidth channels. Channels 7 through 15 are lite channels.
//!
//! # Safety
//!
//! The DMA controller is shared with the GPU firmware and every other
//! process that maps it. Picking a channel only checks that the channel is
//! idle right now. Nothing stops another actor from starting the same
//! channel afterwards.
//!
//! ### License
//!
//! Licensed under either of
//!
//! - [Apache License, Version 2.0](http://www.apache.org/licenses/LICENSE-2.0) ([LICENSE-APACHE](./LICENSE-APACHE))
//! - [MIT License](http://opensource.org/licenses/MIT) ([LICENSE-MIT](./LICENSE-MIT))
//!
//! at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted
//! for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
//! dual licensed as above, without any additional terms or conditions.

#![cfg_attr(not(test), no_std)]

pub mod address;
mod channel;
pub mod clock;
pub mod control_block;
mod error;
pub mod gpio;
pub mod memcpy;
pub mod memory;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pcm;
pub mod pwm;
mod ral;
pub mod raster;
mod soc;
pub mod status;
pub mod stream;
mod transfer;

use core::cell::Cell;

pub use address::{BusAddress, PhysicalAddress};
pub use channel::{Channel, ChannelState, LITE_CHANNELS, STREAM_EXCLUDED};
pub use control_block::{ControlBlock, Dreq, Pacing, TransferRequest};
pub use error::{DebugStatus, Error, Fault};
pub use memory::{Allocator, DmaBuffer};
pub use soc::{Mapper, Soc};
pub use transfer::Transfer;

/// A DMA result
pub type Result<T> = core::result::Result<T, Error>;

/// Channels that [`Dma::pick_channel`] may return, highest first
///
/// Channel 15 is left out. It lives at a different base and transfers on
/// it have always failed.
const PICKABLE: core::ops::RangeInclusive<usize> = 0..=14;

/// The channel number of the separately mapped channel
const CHANNEL_15: usize = 15;

/// The DMA driver
///
/// `Dma` owns the mapped DMA registers and tracks which channels this process
/// has claimed. Construct one at startup and pass it by reference to
/// everything that needs a channel.
pub struct Dma {
    controller: ral::Static<ral::dma::ControllerBlock>,
    channel15: ral::Static<ral::dma::RegisterBlock>,
    /// One bit per channel; set while a `Channel` exists
    claims: critical_section::Mutex<Cell<u16>>,
}

// Safety: OK to allocate a DMA driver in a static context.
unsafe impl Sync for Dma {}
// Safety: the pointers refer to memory-mapped registers, not thread-local data.
unsafe impl Send for Dma {}

impl Dma {
    /// Create the DMA driver
    ///
    /// `controller` points at the start of the DMA block (channels 0 to 14,
    /// the interrupt status and the enable register). `channel15` points at
    /// channel 15's registers.
    ///
    /// # Safety
    ///
    /// Caller must make sure that both pointers are valid, mapped for the
    /// lifetime of the driver, and that no other `Dma` wraps the same
    /// registers in this process.
    pub const unsafe fn new(controller: *const (), channel15: *const ()) -> Self {
        Dma {
            controller: ral::Static(controller.cast()),
            channel15: ral::Static(channel15.cast()),
            claims: critical_section::Mutex::new(Cell::new(0)),
        }
    }

    /// Maps the DMA registers of `soc` and creates the driver
    ///
    /// Mapping failures are returned as the mapper's error; they usually
    /// mean the process lacks permission to map physical memory.
    pub fn map<M: Mapper>(soc: Soc, mapper: &mut M) -> core::result::Result<Self, M::Error> {
        let controller = mapper.map(soc.dma(), soc::DMA_BLOCK_SIZE)?;
        let channel15 = mapper.map(soc.dma_channel15(), soc::CHANNEL_BLOCK_SIZE)?;
        log::debug!("mapped DMA for {soc:?}: {} and {}", soc.dma(), soc.dma_channel15());
        // Safety: the mapper guarantees the mappings outlive the driver.
        Ok(unsafe { Dma::new(controller, channel15) })
    }

    /// Returns the channel enable register
    ///
    /// Bits 0 to 14 correspond to channels 0 to 14.
    pub fn enabled_channels(&self) -> u32 {
        ral::read_reg!(ral::dma, self.controller, ENABLE)
    }

    /// Returns the interrupt status register
    pub fn interrupt_status(&self) -> u32 {
        ral::read_reg!(ral::dma, self.controller, INT_STATUS)
    }

    /// Returns the debug register of channel `index`, or `None` above 15
    ///
    /// Reading it has no side effects, so it's fine on channels owned
    /// by someone else.
    pub fn debug_status(&self, index: usize) -> Option<DebugStatus> {
        (index <= CHANNEL_15)
            .then(|| DebugStatus::new(ral::read_reg!(ral::dma, self.registers(index), DEBUG)))
    }

    /// Picks an idle channel that isn't in `exclude`
    ///
    /// Channels are scanned from 14 down to 0, so lite channels are preferred.
    /// A channel is idle when its status is clear, ignoring DREQ, and it has
    /// no control block address. Returns `None` right away when no channel
    /// qualifies.
    ///
    /// The returned channel is claimed until it's dropped.
    pub fn pick_channel(&self, exclude: &[usize]) -> Option<Channel<'_>> {
        let picked = critical_section::with(|cs| {
            let claims = self.claims.borrow(cs);
            let index = PICKABLE.rev().find(|&index| {
                !exclude.contains(&index)
                    && claims.get() & (1 << index) == 0
                    && channel::available(&self.registers(index))
            })?;
            claims.set(claims.get() | (1 << index));
            Some(index)
        });
        match picked {
            Some(index) => {
                log::debug!("picked channel {index} (excluding {exclude:?})");
                Some(Channel::new(index, self.registers(index), self))
            }
            None => {
                log::debug!("no idle channel (excluding {exclude:?})");
                None
            }
        }
    }

    /// Creates a handle for channel `index`, without checking availability
    ///
    /// Returns `None` if `index` is above 15, or if this process already
    /// holds a handle for the channel. Use this to reset a channel that was
    /// left running.
    ///
    /// # Safety
    ///
    /// The channel may be in use by another actor. Starting or resetting it
    /// interrupts their transfer.
    pub unsafe fn channel(&self, index: usize) -> Option<Channel<'_>> {
        if index > CHANNEL_15 {
            return None;
        }
        let claimed = critical_section::with(|cs| {
            let claims = self.claims.borrow(cs);
            if claims.get() & (1 << index) != 0 {
                false
            } else {
                claims.set(claims.get() | (1 << index));
                true
            }
        });
        claimed.then(|| Channel::new(index, self.registers(index), self))
    }

    /// Runs a control block chain to completion on any idle channel
    ///
    /// Lite channels are excluded unless `lite_allowed`; pass `false` when
    /// any block is longer than [`MAX_LITE_LENGTH`](control_block::MAX_LITE_LENGTH).
    /// The channel is reset on every exit path.
    ///
    /// # Safety
    ///
    /// `control_block` must be the physical address of a valid chain, and
    /// the chain and every buffer it references must stay allocated until
    /// this call returns.
    pub unsafe fn run_synchronous(
        &self,
        control_block: PhysicalAddress,
        lite_allowed: bool,
    ) -> Result<()> {
        let exclude = if lite_allowed { &[][..] } else { LITE_CHANNELS };
        let mut channel = self.pick_channel(exclude).ok_or(Error::ResourceExhausted)?;
        let transfer = Transfer::start(&mut channel, control_block);
        transfer.wait()
    }

    fn registers(&self, index: usize) -> ral::Static<ral::dma::RegisterBlock> {
        if index == CHANNEL_15 {
            self.channel15
        } else {
            ral::Static(&self.controller.CHANNELS[index])
        }
    }

    pub(crate) fn release(&self, index: usize) {
        critical_section::with(|cs| {
            let claims = self.claims.borrow(cs);
            claims.set(claims.get() & !(1 << index));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockController, Register};
    use crate::ral::dma::CS;

    #[test]
    fn picks_highest_idle_channel() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        let first = dma.pick_channel(&[]).unwrap();
        let second = dma.pick_channel(&[]).unwrap();
        assert_eq!(first.channel(), 14);
        assert_eq!(second.channel(), 13);
    }

    #[test]
    fn pick_skips_excluded() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        assert_eq!(dma.pick_channel(LITE_CHANNELS).unwrap().channel(), 6);
        assert_eq!(dma.pick_channel(STREAM_EXCLUDED).unwrap().channel(), 5);
        assert_eq!(dma.pick_channel(&[14, 12]).unwrap().channel(), 13);
    }

    #[test]
    fn pick_skips_busy_channels_but_ignores_dreq() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        controller.write(14, Register::ConblkAd, 0x0010_0000);
        controller.write(13, Register::Cs, CS::ACTIVE::mask);
        controller.write(12, Register::Cs, CS::DREQ::mask);
        assert_eq!(dma.pick_channel(&[]).unwrap().channel(), 12);
    }

    #[test]
    fn exhaustion_is_immediate() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        for index in 0..=14 {
            controller.write(index, Register::ConblkAd, 0x0010_0000);
        }
        assert!(dma.pick_channel(&[]).is_none());
        assert_eq!(
            unsafe { dma.run_synchronous(PhysicalAddress(0x0010_0000), true) },
            Err(Error::ResourceExhausted)
        );
    }

    #[test]
    fn concurrent_picks_are_exclusive() {
        const PICKERS: usize = 8;
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        for _ in 0..200 {
            let barrier = &std::sync::Barrier::new(PICKERS);
            let dma = &dma;
            let picked: Vec<Channel<'_>> = std::thread::scope(|scope| {
                let pickers: Vec<_> = (0..PICKERS)
                    .map(|_| {
                        scope.spawn(move || {
                            barrier.wait();
                            dma.pick_channel(&[])
                        })
                    })
                    .collect();
                pickers
                    .into_iter()
                    .filter_map(|picker| picker.join().unwrap())
                    .collect()
            });
            assert_eq!(picked.len(), PICKERS);
            let mut indices: Vec<usize> = picked.iter().map(Channel::channel).collect();
            indices.sort_unstable();
            indices.dedup();
            assert_eq!(indices.len(), PICKERS, "{indices:?}");
            drop(picked);
            controller.settle();
        }
    }

    #[test]
    fn channel_15_only_by_index() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        let held: Vec<Channel<'_>> = core::iter::from_fn(|| dma.pick_channel(&[])).collect();
        assert_eq!(held.len(), 15);
        assert!(held.iter().all(|channel| channel.channel() != 15));

        let fifteen = unsafe { dma.channel(15) }.unwrap();
        assert!(fifteen.is_lite());
        assert!(unsafe { dma.channel(15) }.is_none());
        assert!(unsafe { dma.channel(16) }.is_none());
        assert!(unsafe { dma.channel(3) }.is_none());
    }

    #[test]
    fn debug_status_by_index() {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        assert!(!dma.debug_status(6).unwrap().is_lite());
        assert!(dma.debug_status(7).unwrap().is_lite());
        assert!(dma.debug_status(16).is_none());
        assert_eq!(dma.enabled_channels(), ral::dma::ENABLE_ALL);
    }

    struct Pages {
        pages: Vec<Box<[u32; 1024]>>,
        requests: Vec<(PhysicalAddress, usize)>,
    }

    unsafe impl Mapper for Pages {
        type Error = ();
        fn map(
            &mut self,
            base: PhysicalAddress,
            len: usize,
        ) -> core::result::Result<*const (), ()> {
            self.requests.push((base, len));
            let page = self.pages.get(self.requests.len() - 1).ok_or(())?;
            Ok(page.as_ptr().cast())
        }
    }

    #[test]
    fn map_requests_both_blocks() {
        let mut mapper = Pages {
            pages: vec![Box::new([0; 1024]), Box::new([0; 1024])],
            requests: Vec::new(),
        };
        let dma = Dma::map(Soc::Bcm2837, &mut mapper).unwrap();
        assert_eq!(
            mapper.requests,
            [
                (PhysicalAddress(0x3F00_7000), 0x1000),
                (PhysicalAddress(0x3FE0_5000), 0x100)
            ]
        );
        assert_eq!(dma.enabled_channels(), 0);

        let mut refused = Pages {
            pages: Vec::new(),
            requests: Vec::new(),
        };
        assert!(Dma::map(Soc::Bcm2835, &mut refused).is_err());
        assert_eq!(refused.requests, [(PhysicalAddress(0x2000_7000), 0x1000)]);
    }
}
