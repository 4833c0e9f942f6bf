use aligned_vec::{AVec, ConstAlign};
use log::warn;

use crate::error::RocError;

/// Alignment for host DMA buffers (one small page).
pub const DMA_ALIGN: usize = 4096;

pub type DmaBuffer = AVec<u8, ConstAlign<DMA_ALIGN>>;

/// Create a new page-aligned DMA-able buffer of `size` bytes, zeroed.
pub fn alloc_dma_buffer(size: usize) -> DmaBuffer {
    AVec::from_iter(DMA_ALIGN, std::iter::repeat_n(0u8, size))
}

/// One contiguous piece of a registered buffer in bus-address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterGatherEntry {
    pub user_address: usize,
    pub bus_address: u64,
    pub size: usize,
}

/// Translates registered user memory to bus addresses.
///
/// Implementations wrap the IOMMU / DMA-buffer interface of the host.
/// The returned entries are in increasing user-address order.
pub trait BusMapper {
    fn map(&mut self, ptr: *mut u8, size: usize) -> Result<Vec<ScatterGatherEntry>, RocError>;
}

/// Mapper for memory whose bus view equals its user view (tests, the
/// dummy channel, hosts without an IOMMU).
pub struct IdentityMapper;

impl BusMapper for IdentityMapper {
    fn map(&mut self, ptr: *mut u8, size: usize) -> Result<Vec<ScatterGatherEntry>, RocError> {
        Ok(vec![ScatterGatherEntry {
            user_address: ptr as usize,
            bus_address: ptr as u64,
            size,
        }])
    }
}

/// A client buffer after bus registration, clipped to what the engine
/// can actually address.
///
/// The engine requires the buffer contiguous in bus space; a
/// multi-segment mapping is clipped to its first segment so that
/// `bus + offset` stays valid for every accepted superpage.
#[derive(Debug, Clone, Copy)]
pub struct BufferView {
    pub ptr: *mut u8,
    pub bus_address: u64,
    pub size: usize,
}

impl BufferView {
    /// View with no memory behind it (dummy channel, Null buffer).
    pub fn null() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            bus_address: 0,
            size: 0,
        }
    }

    pub fn register(
        mapper: &mut dyn BusMapper,
        ptr: *mut u8,
        size: usize,
    ) -> Result<Self, RocError> {
        let entries = mapper.map(ptr, size)?;
        let first = entries
            .first()
            .ok_or(RocError::Parameter("bus mapper returned no segments"))?;
        if entries.len() > 1 {
            warn!(
                "buffer maps to {} bus segments, clipping DMA window to first ({} of {} bytes)",
                entries.len(),
                first.size,
                size
            );
        }
        Ok(Self {
            ptr: first.user_address as *mut u8,
            bus_address: first.bus_address,
            size: first.size,
        })
    }

    pub fn bus_address_of(&self, offset: usize) -> u64 {
        self.bus_address + offset as u64
    }
}
