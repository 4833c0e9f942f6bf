pub mod card;
pub mod engine;
pub mod fifo;
pub mod firmware;

use log::debug;

use crate::buffer::{BufferView, DmaBuffer};
use crate::channel::{CardType, DmaChannel};
use crate::crorc::card::CardOps;
use crate::crorc::engine::{DmaEngine, EngineConfig, GeneratorConfig};
use crate::crorc::fifo::ReadyFifo;
use crate::error::RocError;
use crate::parameters::{Parameters, ReadoutMode, ResetLevel};
use crate::pci::{CardId, PciAddress};
use crate::superpage::{
    READY_QUEUE_SIZE, Superpage, SuperpageEntry, SuperpageQueue, TRANSFER_QUEUE_SIZE,
};

/// Superpage size granule: 1 MiB holds exactly one full ring of 128
/// 8 KiB pages.
pub const CRORC_SUPERPAGE_GRANULE: usize = 1024 * 1024;

/// The C-RORC transfers fixed 8 KiB pages.
pub const CRORC_DMA_PAGE_SIZE: usize = 8 * 1024;

/// Highest C-RORC channel number.
const MAX_CHANNEL: u32 = 5;

/// C-RORC DMA channel: validation and public API over the superpage
/// engine.
pub struct CrorcChannel {
    engine: DmaEngine,
    address: PciAddress,
    buffer: BufferView,
    serial: Option<i32>,
    firmware: Option<String>,
    _resources: ChannelResources,
}

/// Backing allocations and locks that must outlive the engine.
struct ChannelResources {
    _fifo: FifoBacking,
    #[cfg(feature = "hw")]
    _buffer_region: Option<crate::hw::memory::MappedRegion>,
    #[cfg(feature = "hw")]
    _lock: Option<crate::hw::lock::ChannelLock>,
}

enum FifoBacking {
    Owned(#[allow(dead_code)] DmaBuffer),
    #[cfg(feature = "hw")]
    Mapped(#[allow(dead_code)] crate::hw::memory::MappedRegion),
}

fn address_of(parameters: &Parameters) -> Result<PciAddress, RocError> {
    match parameters.card_id {
        CardId::Address(address) => Ok(address),
        // Serial-to-address resolution needs PCI enumeration, which is a
        // collaborator concern.
        CardId::Serial(_) => Err(RocError::Parameter(
            "C-RORC channels must be identified by PCI address",
        )),
    }
}

impl CrorcChannel {
    /// Build a channel from prepared collaborators: a card-ops handle,
    /// owned memory for the ready FIFO (with its bus address) and the
    /// registered client buffer.
    pub fn new(
        parameters: &Parameters,
        card: Box<dyn CardOps>,
        mut fifo_memory: DmaBuffer,
        fifo_bus_address: u64,
        buffer: BufferView,
    ) -> Result<Self, RocError> {
        let address = address_of(parameters)?;
        let fifo = unsafe { ReadyFifo::new(fifo_memory.as_mut_ptr(), fifo_memory.len())? };
        Self::build(
            parameters,
            card,
            address,
            fifo,
            fifo_bus_address,
            buffer,
            ChannelResources {
                _fifo: FifoBacking::Owned(fifo_memory),
                #[cfg(feature = "hw")]
                _buffer_region: None,
                #[cfg(feature = "hw")]
                _lock: None,
            },
        )
    }

    /// Open a channel the production way: take the per-channel locks,
    /// create and register the `_fifo` shared-memory file, and map and
    /// register the client buffer.
    #[cfg(feature = "hw")]
    pub fn open(
        parameters: &Parameters,
        card: Box<dyn CardOps>,
        mapper: &mut dyn crate::buffer::BusMapper,
    ) -> Result<Self, RocError> {
        use crate::crorc::fifo::READYFIFO_BYTES;
        use crate::hw::lock::{ChannelLock, LockMode};
        use crate::hw::memory::MappedRegion;
        use crate::hw::paths;
        use crate::parameters::BufferParameters;

        let address = address_of(parameters)?;
        let lock = ChannelLock::acquire(address, parameters.channel_number, LockMode::Try)?;

        let fifo_region = MappedRegion::create(
            &paths::fifo_path(address, parameters.channel_number),
            READYFIFO_BYTES,
        )?;
        let fifo_entries = mapper.map(fifo_region.ptr(), fifo_region.len())?;
        let first = fifo_entries
            .first()
            .ok_or(RocError::Parameter("bus mapper returned no segments"))?;
        if first.size < READYFIFO_BYTES {
            return Err(RocError::Fifo {
                size: first.size,
                required: READYFIFO_BYTES,
            });
        }
        let fifo = unsafe { ReadyFifo::new(fifo_region.ptr(), fifo_region.len())? };
        let fifo_bus_address = first.bus_address;

        let (buffer, buffer_region) = match &parameters.buffer {
            BufferParameters::Memory { ptr, size } => {
                (BufferView::register(mapper, *ptr, *size)?, None)
            }
            BufferParameters::File { path, size } => {
                let region = MappedRegion::create(path, *size)?;
                let view = BufferView::register(mapper, region.ptr(), region.len())?;
                (view, Some(region))
            }
            BufferParameters::Null => {
                return Err(RocError::Parameter("C-RORC channel requires a DMA buffer"));
            }
        };

        Self::build(
            parameters,
            card,
            address,
            fifo,
            fifo_bus_address,
            buffer,
            ChannelResources {
                _fifo: FifoBacking::Mapped(fifo_region),
                _buffer_region: buffer_region,
                _lock: Some(lock),
            },
        )
    }

    fn build(
        parameters: &Parameters,
        mut card: Box<dyn CardOps>,
        address: PciAddress,
        fifo: ReadyFifo,
        fifo_bus_address: u64,
        buffer: BufferView,
        resources: ChannelResources,
    ) -> Result<Self, RocError> {
        if parameters.channel_number > MAX_CHANNEL {
            return Err(RocError::Parameter("C-RORC channel number must be 0..=5"));
        }
        if parameters.dma_page_size != CRORC_DMA_PAGE_SIZE {
            return Err(RocError::Parameter(
                "the C-RORC only supports the 8 KiB DMA page size",
            ));
        }
        if parameters.generator_enabled
            && (parameters.generator_data_size == 0
                || parameters.generator_data_size > parameters.dma_page_size
                || parameters.generator_data_size % 4 != 0)
        {
            return Err(RocError::Parameter(
                "generator data size must be a word multiple of at most one DMA page",
            ));
        }
        if parameters.generator_enabled && parameters.readout_mode == ReadoutMode::Triggered {
            return Err(RocError::Parameter(
                "triggered readout cannot use the data generator",
            ));
        }

        let serial = card.serial();
        let firmware = card.firmware_info().ok();
        debug!(
            "opening C-RORC channel {} on {address} (serial {serial:?})",
            parameters.channel_number
        );

        let generator = parameters
            .generator_enabled
            .then(|| GeneratorConfig::from_parameters(parameters));
        let engine = DmaEngine::new(
            card,
            fifo,
            fifo_bus_address,
            buffer,
            SuperpageQueue::new(TRANSFER_QUEUE_SIZE, READY_QUEUE_SIZE),
            EngineConfig {
                page_size: parameters.dma_page_size,
                reset_level: parameters.reset_level,
                loopback: parameters.generator_loopback,
                generator,
                rdyrx_enabled: parameters.rdyrx_enabled,
            },
        );

        Ok(Self {
            engine,
            address,
            buffer,
            serial,
            firmware,
            _resources: resources,
        })
    }

    /// Outstanding descriptors in the hardware ring (diagnostics).
    pub fn fifo_size(&self) -> usize {
        self.engine.fifo_size()
    }
}

impl Drop for CrorcChannel {
    fn drop(&mut self) {
        // Teardown parks the card in a stopped state; stop never fails.
        let _ = self.engine.stop();
    }
}

impl DmaChannel for CrorcChannel {
    fn push_superpage(&mut self, superpage: Superpage) -> Result<(), RocError> {
        if superpage.size == 0 || superpage.size % CRORC_SUPERPAGE_GRANULE != 0 {
            return Err(RocError::Parameter(
                "superpage size must be a non-zero multiple of 1 MiB",
            ));
        }
        if superpage.offset % 4 != 0 {
            return Err(RocError::Alignment("superpage offset must be 32-bit aligned"));
        }
        if superpage
            .offset
            .checked_add(superpage.size)
            .is_none_or(|end| end > self.buffer.size)
        {
            return Err(RocError::OutOfRange {
                offset: superpage.offset,
                size: superpage.size,
                window: self.buffer.size,
            });
        }
        let entry = SuperpageEntry::new(
            Superpage::new(superpage.offset, superpage.size),
            self.buffer.bus_address_of(superpage.offset),
            self.engine.page_size(),
        );
        self.engine.push_entry(entry)
    }

    fn pop_superpage(&mut self) -> Result<Superpage, RocError> {
        self.engine.pop_filled().ok_or(RocError::QueueEmpty)
    }

    fn get_superpage(&self) -> Result<Superpage, RocError> {
        self.engine.front_filled().copied().ok_or(RocError::QueueEmpty)
    }

    fn transfer_queue_available(&self) -> usize {
        self.engine.transfer_queue_available()
    }

    fn ready_queue_size(&self) -> usize {
        self.engine.ready_queue_size()
    }

    fn fill_superpages(&mut self) -> Result<(), RocError> {
        self.engine.fill()
    }

    fn start_dma(&mut self) -> Result<(), RocError> {
        self.engine.start()
    }

    fn stop_dma(&mut self) -> Result<(), RocError> {
        self.engine.stop()
    }

    fn reset_channel(&mut self, level: ResetLevel) -> Result<(), RocError> {
        self.engine.reset(level)
    }

    fn card_type(&self) -> CardType {
        CardType::Crorc
    }

    fn serial(&self) -> Option<i32> {
        self.serial
    }

    fn firmware_info(&self) -> Option<String> {
        self.firmware.clone()
    }

    fn temperature(&self) -> Option<f32> {
        // The C-RORC exposes no temperature sensor through this contract.
        None
    }

    fn pci_address(&self) -> PciAddress {
        self.address
    }

    fn numa_node(&self) -> i32 {
        crate::pci::numa_node(self.address)
    }
}
