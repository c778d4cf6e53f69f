//! SPI session abstraction.
//!
//! The driver never owns a bus master; board attachment hands it one exclusive
//! session per chip select. A session exchanges single frames or a whole
//! [`SpiMessage`] of consecutive slots under one bus lock, which is what makes
//! batched ("hunk") acquisition worthwhile on a transport where every message
//! carries fixed setup cost.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Link parameters applied before an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub chip_select: u8,
    pub max_speed_hz: u32,
    pub mode: u8,
    pub bits_per_word: u8,
}

/// One transfer inside a batched message. `offset`/`len` address both the
/// tx and rx buffers, which share a layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferSlot {
    pub offset: usize,
    pub len: usize,
    /// Pause after this slot completes
    pub delay_usecs: u32,
    /// Toggle chip select after this slot, restarting the converter
    pub cs_change: bool,
}

/// A multi-slot message with shared tx/rx buffers, reused across batches.
#[derive(Debug, Default)]
pub struct SpiMessage {
    pub tx: Vec<u8>,
    pub rx: Vec<u8>,
    pub slots: Vec<TransferSlot>,
}

impl SpiMessage {
    /// Allocate buffers large enough for `slots` transfers of `frame_len`
    /// bytes each.
    pub fn with_capacity(frame_len: usize, slots: usize) -> Self {
        Self {
            tx: Vec::with_capacity(frame_len * slots),
            rx: Vec::with_capacity(frame_len * slots),
            slots: Vec::with_capacity(slots),
        }
    }

    /// Drop all slots, keeping the allocations.
    pub fn clear(&mut self) {
        self.tx.clear();
        self.rx.clear();
        self.slots.clear();
    }

    /// Append one slot carrying `frame`.
    pub fn push_slot(&mut self, frame: &[u8], delay_usecs: u32, cs_change: bool) {
        let offset = self.tx.len();
        self.tx.extend_from_slice(frame);
        self.rx.resize(self.rx.len() + frame.len(), 0);
        self.slots.push(TransferSlot {
            offset,
            len: frame.len(),
            delay_usecs,
            cs_change,
        });
    }

    /// Number of slots queued.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slots are queued.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Received bytes for slot `index`.
    pub fn rx_slot(&self, index: usize) -> &[u8] {
        let slot = &self.slots[index];
        &self.rx[slot.offset..slot.offset + slot.len]
    }
}

/// One exclusive hardware link to a single chip select.
///
/// Implementations are handed in by the board-attachment layer; the crate
/// ships [`crate::mock::MockAdc`] and [`crate::mock::MockDac`] for tests.
pub trait SpiSession: Send {
    /// Apply link parameters (mode, clock) before subsequent exchanges.
    fn configure(&mut self, link: &LinkSettings) -> Result<()>;

    /// Exchange a single frame. `tx` and `rx` have equal length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()>;

    /// Exchange every slot of a message under one bus lock. The default
    /// implementation walks the slots one frame at a time and leaves the
    /// per-slot delays to the transport; hardware sessions override this
    /// with a real multi-transfer submission.
    fn transfer_message(&mut self, msg: &mut SpiMessage) -> Result<()> {
        let SpiMessage { tx, rx, slots } = msg;
        for slot in slots.iter() {
            let range = slot.offset..slot.offset + slot.len;
            self.transfer(&tx[range.clone()], &mut rx[range])?;
        }
        Ok(())
    }
}

/// Shared handle to a session, locked per exchange.
pub type SharedSession = Arc<Mutex<Box<dyn SpiSession>>>;
