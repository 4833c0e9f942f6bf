use crate::dummy::DummyChannel;
use crate::error::RocError;
use crate::parameters::{Parameters, ResetLevel};
use crate::pci::PciAddress;
use crate::superpage::Superpage;

/// Readout card families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Dummy,
    Crorc,
    Cru,
}

/// The public contract of a DMA channel.
///
/// One implementation per card family; implementations share nothing but
/// this trait. All operations are single-threaded from the client's
/// perspective and none of them blocks on I/O.
pub trait DmaChannel {
    /// Hand a buffer region to the driver for filling. Validates size
    /// granule, offset alignment and range before queueing.
    fn push_superpage(&mut self, superpage: Superpage) -> Result<(), RocError>;

    /// Remove and return the oldest filled superpage.
    fn pop_superpage(&mut self) -> Result<Superpage, RocError>;

    /// Peek the oldest filled superpage without removing it.
    fn get_superpage(&self) -> Result<Superpage, RocError>;

    /// Remaining slack on the transfer side of the queue.
    fn transfer_queue_available(&self) -> usize;

    /// Superpages waiting to be popped.
    fn ready_queue_size(&self) -> usize;

    /// The engine tick. Must be called regularly while DMA runs; this is
    /// the only operation that advances the transfer state machine.
    fn fill_superpages(&mut self) -> Result<(), RocError>;

    fn start_dma(&mut self) -> Result<(), RocError>;

    fn stop_dma(&mut self) -> Result<(), RocError>;

    fn reset_channel(&mut self, level: ResetLevel) -> Result<(), RocError>;

    fn card_type(&self) -> CardType;

    fn serial(&self) -> Option<i32>;

    fn firmware_info(&self) -> Option<String>;

    fn temperature(&self) -> Option<f32>;

    fn pci_address(&self) -> PciAddress;

    fn numa_node(&self) -> i32;
}

/// Serial number reported by dummy channels.
const DUMMY_SERIAL: i32 = -1;

/// Creates channels. An explicit value, constructed once at startup and
/// passed to whoever opens channels; there is no global registry.
pub struct ChannelFactory {
    dummy_serial: i32,
}

impl ChannelFactory {
    pub fn new() -> Self {
        Self {
            dummy_serial: DUMMY_SERIAL,
        }
    }

    pub fn dummy_serial(&self) -> i32 {
        self.dummy_serial
    }

    pub fn open_dummy(&self, parameters: &Parameters) -> Result<DummyChannel, RocError> {
        DummyChannel::new(parameters, self.dummy_serial)
    }

    /// Open a C-RORC channel over prepared collaborators.
    #[cfg(feature = "hw")]
    pub fn open_crorc(
        &self,
        parameters: &Parameters,
        card: Box<dyn crate::crorc::card::CardOps>,
        mapper: &mut dyn crate::buffer::BusMapper,
    ) -> Result<crate::crorc::CrorcChannel, RocError> {
        crate::crorc::CrorcChannel::open(parameters, card, mapper)
    }
}

impl Default for ChannelFactory {
    fn default() -> Self {
        Self::new()
    }
}
