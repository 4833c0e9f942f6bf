use std::ptr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::RocError;

/// Depth of the card's descriptor ring.
pub const READYFIFO_ENTRIES: usize = 128;

/// Most descriptors the engine keeps outstanding. Must not exceed the
/// ring depth.
pub const FIFO_QUEUE_MAX: usize = READYFIFO_ENTRIES;

/// Descriptor-trailer status word magic: `status & 0xff` of a whole
/// arrival.
pub const DTSW: i32 = 0x82;

/// Status word of an unfilled slot.
pub const STATUS_EMPTY: i32 = -1;

/// Status word of a partial arrival.
pub const STATUS_PARTIAL: i32 = 0;

/// Hardware error flag in the status word.
const STATUS_ERROR_BIT: i32 = 1 << 31;

/// One slot of the ring the card DMAs completion reports into.
/// Layout is fixed by the card: two native-endian 32-bit words.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
pub struct ReadyFifoEntry {
    pub length: u32,
    pub status: i32,
}

/// Size of the ring in bytes.
pub const READYFIFO_BYTES: usize = READYFIFO_ENTRIES * size_of::<ReadyFifoEntry>();

/// What a slot's status word says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing has arrived; later slots cannot have arrived either.
    Empty,
    /// Partial arrival in progress.
    Partial,
    /// A whole event landed in the page.
    Arrived { length: u32, error: bool },
    /// Status word the protocol does not define.
    Unexpected,
}

/// View over the descriptor ring shared with the card.
///
/// The card writes slots by DMA, so every read is a single-word volatile
/// load and every reset a volatile store; nothing here is cached.
pub struct ReadyFifo {
    base: *mut ReadyFifoEntry,
}

// The engine is single-threaded per channel; the view is only !Send
// because of the raw pointer.
unsafe impl Send for ReadyFifo {}

impl ReadyFifo {
    /// Build a view over `len` bytes at `base`.
    ///
    /// # Safety
    /// `base` must point to at least `len` bytes of memory that stays
    /// mapped (and registered for DMA) for the lifetime of the view.
    pub unsafe fn new(base: *mut u8, len: usize) -> Result<Self, RocError> {
        if len < READYFIFO_BYTES {
            return Err(RocError::Fifo {
                size: len,
                required: READYFIFO_BYTES,
            });
        }
        Ok(Self {
            base: base.cast::<ReadyFifoEntry>(),
        })
    }

    fn slot(&self, index: usize) -> *mut ReadyFifoEntry {
        debug_assert!(index < READYFIFO_ENTRIES);
        unsafe { self.base.add(index) }
    }

    pub fn status(&self, index: usize) -> i32 {
        unsafe { ptr::read_volatile(&raw const (*self.slot(index)).status) }
    }

    pub fn length(&self, index: usize) -> u32 {
        unsafe { ptr::read_volatile(&raw const (*self.slot(index)).length) }
    }

    /// Classify the slot from one status load. `length` is only read
    /// when the status says a whole event arrived.
    pub fn slot_state(&self, index: usize) -> SlotState {
        let status = self.status(index);
        match status {
            STATUS_EMPTY => SlotState::Empty,
            STATUS_PARTIAL => SlotState::Partial,
            _ if status & 0xff == DTSW => SlotState::Arrived {
                length: self.length(index),
                error: status & STATUS_ERROR_BIT != 0,
            },
            _ => SlotState::Unexpected,
        }
    }

    /// Consume a slot: mark it empty so the next wrap-around arrival is
    /// distinguishable.
    pub fn reset_slot(&mut self, index: usize) {
        let slot = self.slot(index);
        unsafe {
            ptr::write_volatile(&raw mut (*slot).length, 0);
            ptr::write_volatile(&raw mut (*slot).status, STATUS_EMPTY);
        }
    }

    pub fn reset_all(&mut self) {
        for index in 0..READYFIFO_ENTRIES {
            self.reset_slot(index);
        }
    }
}
