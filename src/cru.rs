//! Frame-header decoding for the CRU sibling of the C-RORC.
//!
//! The CRU prefixes every event with a 64-byte header (two 256-bit
//! words). Only the link ID and event size are of interest here.

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// CRU frame header viewed as sixteen little-endian 32-bit words.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct CruFrameHeader {
    pub words: [U32; 16],
}

/// Header size in bytes.
pub const CRU_FRAME_HEADER_BYTES: usize = size_of::<CruFrameHeader>();

impl CruFrameHeader {
    /// Link the frame arrived on: bits 8-15 of word 2.
    pub fn link_id(&self) -> u32 {
        (self.words[2].get() >> 8) & 0xff
    }

    /// Event size in 256-bit words: bits 8-23 of word 3.
    pub fn event_size(&self) -> u32 {
        (self.words[3].get() >> 8) & 0xffff
    }
}
