pub mod buffer;
pub mod channel;
pub mod crorc;
pub mod cru;
pub mod dummy;
pub mod error;
#[cfg(feature = "hw")]
pub mod hw;
pub mod parameters;
pub mod pci;
pub mod superpage;

pub use channel::{CardType, ChannelFactory, DmaChannel};
pub use error::RocError;
pub use parameters::{ChannelOptions, Parameters};
pub use pci::{CardId, PciAddress};
pub use superpage::Superpage;
