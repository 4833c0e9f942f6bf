use std::collections::VecDeque;

use crate::error::RocError;

/// Entries the transfer side (Pushing + Arrivals) can hold.
pub const TRANSFER_QUEUE_SIZE: usize = 128;

/// Entries the Filled side can hold before the client must pop.
pub const READY_QUEUE_SIZE: usize = 128;

/// A contiguous region of the client's registered DMA buffer.
///
/// The client owns the memory; the driver borrows it from push to pop and
/// accounts arrived bytes in `received`. `ready` holds exactly when
/// `received == size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superpage {
    /// Byte offset within the registered buffer. 32-bit aligned.
    pub offset: usize,
    /// Size in bytes; a multiple of the variant's granule.
    pub size: usize,
    /// Bytes DMA'd so far. A multiple of the DMA page size.
    pub received: usize,
    pub ready: bool,
}

impl Superpage {
    pub fn new(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            received: 0,
            ready: false,
        }
    }
}

/// Driver-internal wrapper around a queued superpage.
#[derive(Debug, Clone, Copy)]
pub struct SuperpageEntry {
    pub superpage: Superpage,
    /// Bus address of the superpage start (buffer base + offset).
    pub bus_address: u64,
    /// Total DMA pages this superpage holds.
    pub max_pages: usize,
    /// Pages already handed to the card's free-page FIFO.
    pub pushed_pages: usize,
}

impl SuperpageEntry {
    pub fn new(superpage: Superpage, bus_address: u64, page_size: usize) -> Self {
        Self {
            superpage,
            bus_address,
            max_pages: superpage.size / page_size,
            pushed_pages: 0,
        }
    }

    pub fn is_fully_pushed(&self) -> bool {
        self.pushed_pages == self.max_pages
    }
}

/// Three FIFOs (Pushing, Arrivals, Filled) behaving as one in-order
/// pipeline.
///
/// A single age-ordered deque with two boundaries: entries before
/// `filled` are Filled, entries before `pushed` are fully pushed
/// (Filled + Arrivals), the rest are Pushing. An entry advances
/// Pushing → Arrivals when its last page has been handed to the card and
/// Arrivals → Filled when its last page has arrived, so insertion order
/// is preserved end to end.
pub struct SuperpageQueue {
    entries: VecDeque<SuperpageEntry>,
    /// entries[..filled] are Filled.
    filled: usize,
    /// entries[..pushed] are fully pushed. filled <= pushed <= len.
    pushed: usize,
    transfer_capacity: usize,
    ready_capacity: usize,
}

impl SuperpageQueue {
    pub fn new(transfer_capacity: usize, ready_capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(transfer_capacity),
            filled: 0,
            pushed: 0,
            transfer_capacity,
            ready_capacity,
        }
    }

    /// Append a new entry to the tail of Pushing.
    pub fn add(&mut self, entry: SuperpageEntry) -> Result<(), RocError> {
        if self.available() == 0 {
            return Err(RocError::QueueFull);
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// |Pushing| + |Arrivals|.
    pub fn transfer_len(&self) -> usize {
        self.entries.len() - self.filled
    }

    /// Remaining slack on the transfer side.
    pub fn available(&self) -> usize {
        self.transfer_capacity - self.transfer_len()
    }

    /// |Filled|.
    pub fn filled_len(&self) -> usize {
        self.filled
    }

    /// Oldest entry still being pushed.
    pub fn front_pushing_mut(&mut self) -> Option<&mut SuperpageEntry> {
        if self.pushed < self.entries.len() {
            self.entries.get_mut(self.pushed)
        } else {
            None
        }
    }

    /// The front of Pushing has handed its last page to the card; it
    /// joins the tail of Arrivals.
    pub fn mark_front_pushed(&mut self) {
        debug_assert!(self.pushed < self.entries.len());
        debug_assert!(self.entries[self.pushed].is_fully_pushed());
        self.pushed += 1;
    }

    /// Oldest entry that is not yet filled: the entry owning the oldest
    /// outstanding descriptors in the hardware ring. This is the head of
    /// Arrivals when Arrivals is non-empty, and otherwise the head of
    /// Pushing (an entry larger than one ring collects arrivals while its
    /// tail pages are still being pushed).
    pub fn front_arrivals_mut(&mut self) -> Option<&mut SuperpageEntry> {
        if self.filled < self.entries.len() {
            self.entries.get_mut(self.filled)
        } else {
            None
        }
    }

    /// Move fully received entries from the head of Arrivals to the tail
    /// of Filled, stopping at the first incomplete entry or when the
    /// ready side is full.
    pub fn move_ready_to_filled(&mut self) {
        while self.filled < self.pushed
            && self.filled < self.ready_capacity
            && self.entries[self.filled].superpage.ready
        {
            self.filled += 1;
        }
    }

    pub fn front_filled(&self) -> Option<&Superpage> {
        if self.filled > 0 {
            self.entries.front().map(|e| &e.superpage)
        } else {
            None
        }
    }

    /// Pop the head of Filled.
    pub fn pop_filled(&mut self) -> Option<Superpage> {
        if self.filled == 0 {
            return None;
        }
        self.filled -= 1;
        self.pushed -= 1;
        self.entries.pop_front().map(|e| e.superpage)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pushing_is_empty(&self) -> bool {
        self.pushed == self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.filled = 0;
        self.pushed = 0;
    }

    /// Forget the transfer progress of every unfilled entry and return
    /// them all to Pushing. Used on DMA restart: their pages are pushed
    /// again from scratch.
    pub fn reset_transfer_progress(&mut self) {
        for entry in self.entries.iter_mut().skip(self.filled) {
            entry.pushed_pages = 0;
            entry.superpage.received = 0;
            entry.superpage.ready = false;
        }
        self.pushed = self.filled;
    }

    /// Sum of pages pushed to the card but not yet credited as received,
    /// across all entries. Equals the number of outstanding ring
    /// descriptors.
    pub fn outstanding_pages(&self, page_size: usize) -> usize {
        self.entries
            .iter()
            .map(|e| e.pushed_pages - e.superpage.received / page_size)
            .sum()
    }
}
