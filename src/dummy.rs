//! Pass-through channel for tests and software integration.
//!
//! Satisfies the same public contract as the hardware channels but moves
//! no data: `fill_superpages` completes every queued superpage as-is.

use std::collections::VecDeque;

use log::warn;

use crate::channel::{CardType, DmaChannel};
use crate::error::RocError;
use crate::parameters::{BufferParameters, Parameters, ResetLevel};
use crate::pci::PciAddress;
use crate::superpage::{READY_QUEUE_SIZE, Superpage, TRANSFER_QUEUE_SIZE};

/// Superpage size granule of the dummy variant.
pub const DUMMY_SUPERPAGE_GRANULE: usize = 32 * 1024;

/// Highest dummy channel number.
const MAX_CHANNEL: u32 = 7;

pub struct DummyChannel {
    serial: i32,
    channel_number: u32,
    /// Bytes addressable by superpages; `usize::MAX` when no buffer is
    /// registered (nothing is ever written through a Null buffer).
    window: usize,
    transfer: VecDeque<Superpage>,
    ready: VecDeque<Superpage>,
    started: bool,
}

impl DummyChannel {
    pub fn new(parameters: &Parameters, serial: i32) -> Result<Self, RocError> {
        if parameters.channel_number > MAX_CHANNEL {
            return Err(RocError::Parameter("dummy channel number must be 0..=7"));
        }
        if !parameters.dma_page_size.is_power_of_two() || parameters.dma_page_size < 1024 {
            return Err(RocError::Parameter(
                "dummy DMA page size must be a power of two of at least 1 KiB",
            ));
        }
        let window = match parameters.buffer {
            BufferParameters::Memory { size, .. } | BufferParameters::File { size, .. } => size,
            BufferParameters::Null => usize::MAX,
        };
        Ok(Self {
            serial,
            channel_number: parameters.channel_number,
            window,
            transfer: VecDeque::new(),
            ready: VecDeque::new(),
            started: false,
        })
    }
}

impl DmaChannel for DummyChannel {
    fn push_superpage(&mut self, superpage: Superpage) -> Result<(), RocError> {
        if superpage.size == 0 || superpage.size % DUMMY_SUPERPAGE_GRANULE != 0 {
            return Err(RocError::Parameter(
                "superpage size must be a non-zero multiple of 32 KiB",
            ));
        }
        if superpage.offset % 4 != 0 {
            return Err(RocError::Alignment("superpage offset must be 32-bit aligned"));
        }
        if superpage
            .offset
            .checked_add(superpage.size)
            .is_none_or(|end| end > self.window)
        {
            return Err(RocError::OutOfRange {
                offset: superpage.offset,
                size: superpage.size,
                window: self.window,
            });
        }
        if self.transfer.len() == TRANSFER_QUEUE_SIZE {
            return Err(RocError::QueueFull);
        }
        self.transfer.push_back(superpage);
        Ok(())
    }

    fn pop_superpage(&mut self) -> Result<Superpage, RocError> {
        self.ready.pop_front().ok_or(RocError::QueueEmpty)
    }

    fn get_superpage(&self) -> Result<Superpage, RocError> {
        self.ready.front().copied().ok_or(RocError::QueueEmpty)
    }

    fn transfer_queue_available(&self) -> usize {
        TRANSFER_QUEUE_SIZE - self.transfer.len()
    }

    fn ready_queue_size(&self) -> usize {
        self.ready.len()
    }

    /// Complete everything in the transfer queue, in order.
    fn fill_superpages(&mut self) -> Result<(), RocError> {
        while self.ready.len() < READY_QUEUE_SIZE {
            let Some(mut superpage) = self.transfer.pop_front() else {
                break;
            };
            superpage.received = superpage.size;
            superpage.ready = true;
            self.ready.push_back(superpage);
        }
        Ok(())
    }

    fn start_dma(&mut self) -> Result<(), RocError> {
        if self.started {
            warn!("DMA already started");
        }
        self.started = true;
        Ok(())
    }

    fn stop_dma(&mut self) -> Result<(), RocError> {
        self.started = false;
        Ok(())
    }

    fn reset_channel(&mut self, _level: ResetLevel) -> Result<(), RocError> {
        Ok(())
    }

    fn card_type(&self) -> CardType {
        CardType::Dummy
    }

    fn serial(&self) -> Option<i32> {
        Some(self.serial)
    }

    fn firmware_info(&self) -> Option<String> {
        Some(format!("dummy channel {}", self.channel_number))
    }

    fn temperature(&self) -> Option<f32> {
        None
    }

    fn pci_address(&self) -> PciAddress {
        PciAddress {
            bus: 0,
            device: 0,
            function: 0,
        }
    }

    fn numa_node(&self) -> i32 {
        0
    }
}
