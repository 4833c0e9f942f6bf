use crate::crorc::card::{Bar, CardError};

/// 32-bit index of the firmware ID (RFID) register in BAR 0.
pub const RFID_REGISTER: usize = 25;

/// Value the reserved field (bits 24-31) of the RFID register must hold.
const RFID_RESERVED: u32 = 0x2;

/// Decoded C-RORC firmware version from the RFID register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub year: u32,
    pub month: u32,
    pub day: u32,
}

impl FirmwareVersion {
    /// Read the RFID register through a BAR and decode it.
    pub fn read(bar: &dyn Bar) -> Result<Self, CardError> {
        Self::decode(bar.read_register(RFID_REGISTER))
    }

    /// Decode the RFID register:
    /// reserved[24:31] (must be 0x2), major[20:23], minor[13:19],
    /// year[9:12] + 2000, month[5:8], day[0:4].
    pub fn decode(rfid: u32) -> Result<Self, CardError> {
        if rfid >> 24 != RFID_RESERVED {
            return Err(CardError::FirmwareMismatch { rfid });
        }
        Ok(Self {
            major: (rfid >> 20) & 0xf,
            minor: (rfid >> 13) & 0x7f,
            year: ((rfid >> 9) & 0xf) + 2000,
            month: (rfid >> 5) & 0xf,
            day: rfid & 0x1f,
        })
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}:{}-{}-{}",
            self.major, self.minor, self.year, self.month, self.day
        )
    }
}
