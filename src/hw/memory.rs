use std::ffi::CString;
use std::ptr;

use crate::error::RocError;

/// A file-backed shared memory mapping (typically under /dev/shm or
/// hugetlbfs).
///
/// The file is created and grown to `len` if needed; the mapping is
/// shared so the card's DMA writes and other processes see the same
/// bytes.
pub struct MappedRegion {
    ptr: *mut u8,
    len: usize,
}

// Mappings are process-global; the raw pointer alone makes this !Send.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    pub fn create(path: &str, len: usize) -> Result<Self, RocError> {
        if len == 0 {
            return Err(RocError::Parameter("cannot map an empty region"));
        }
        let c_path =
            CString::new(path).map_err(|_| RocError::Parameter("invalid path (contains NUL)"))?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o600) };
        if fd < 0 {
            return Err(RocError::Io(std::io::Error::last_os_error()));
        }
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(RocError::Io(err));
        }
        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // The mapping keeps the file open; the descriptor is not needed
        // anymore.
        unsafe {
            libc::close(fd);
        }
        if mapping == libc::MAP_FAILED {
            return Err(RocError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: mapping.cast::<u8>(),
            len,
        })
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
