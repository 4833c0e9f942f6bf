use std::fmt;
use std::str::FromStr;

use crate::error::RocError;

/// PCI geographic address (bus:device.function) of a readout card.
///
/// Rendered lowercase hex as sysfs and lspci print it, e.g. `42:00.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(bus: u8, device: u8, function: u8) -> Result<Self, RocError> {
        if device > 0x1f {
            return Err(RocError::Parameter("PCI device number out of range"));
        }
        if function > 7 {
            return Err(RocError::Parameter("PCI function number out of range"));
        }
        Ok(Self {
            bus,
            device,
            function,
        })
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

impl FromStr for PciAddress {
    type Err = RocError;

    fn from_str(s: &str) -> Result<Self, RocError> {
        let (bus, rest) = s
            .split_once(':')
            .ok_or(RocError::Parameter("PCI address must be bus:device.function"))?;
        let (device, function) = rest
            .split_once('.')
            .ok_or(RocError::Parameter("PCI address must be bus:device.function"))?;
        let bus = u8::from_str_radix(bus, 16)
            .map_err(|_| RocError::Parameter("bad PCI bus number"))?;
        let device = u8::from_str_radix(device, 16)
            .map_err(|_| RocError::Parameter("bad PCI device number"))?;
        let function = u8::from_str_radix(function, 16)
            .map_err(|_| RocError::Parameter("bad PCI function number"))?;
        Self::new(bus, device, function)
    }
}

/// How the client identifies a card: by PCI address or serial number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardId {
    Address(PciAddress),
    Serial(i32),
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{address}"),
            Self::Serial(serial) => write!(f, "{serial}"),
        }
    }
}

impl FromStr for CardId {
    type Err = RocError;

    /// A string containing ':' parses as a PCI address, anything else as
    /// a serial number.
    fn from_str(s: &str) -> Result<Self, RocError> {
        if s.contains(':') {
            Ok(Self::Address(s.parse()?))
        } else {
            let serial = s
                .parse()
                .map_err(|_| RocError::Parameter("card ID is neither PCI address nor serial"))?;
            Ok(Self::Serial(serial))
        }
    }
}

/// NUMA node of the card from sysfs.
/// Never fails — returns -1 (unknown) when the node cannot be determined.
pub fn numa_node(address: PciAddress) -> i32 {
    let path = format!("/sys/bus/pci/devices/0000:{address}/numa_node");
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(-1)
}
