//! In-flight transfers

use crate::{address::PhysicalAddress, Channel, Result};

/// A started DMA transfer
///
/// `Transfer` borrows the channel for as long as the hardware may use the
/// control block chain. Dropping the transfer resets the channel, so the
/// hardware stops on every exit path, including early returns and panics.
pub struct Transfer<'c, 'a> {
    channel: &'c mut Channel<'a>,
}

impl<'c, 'a> Transfer<'c, 'a> {
    /// Starts the chain at `control_block` on `channel`
    ///
    /// # Safety
    ///
    /// Same requirements as [`Channel::start`]: the chain and every buffer it
    /// references must outlive the returned `Transfer`.
    pub unsafe fn start(channel: &'c mut Channel<'a>, control_block: PhysicalAddress) -> Self {
        channel.start(control_block);
        Transfer { channel }
    }

    /// Returns the channel running the transfer
    pub fn channel(&self) -> &Channel<'a> {
        self.channel
    }

    /// Busy-waits for completion or a fault
    pub fn wait(&self) -> Result<()> {
        let result = self.channel.wait();
        if let Err(err) = &result {
            log::debug!("channel {} failed: {err}", self.channel.channel());
        }
        result
    }
}

impl Drop for Transfer<'_, '_> {
    fn drop(&mut self) {
        self.channel.reset();
    }
}
