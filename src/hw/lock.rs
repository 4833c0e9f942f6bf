//! Per-channel exclusive ownership.
//!
//! Two coupled locks are held together:
//!
//! 1. A lock file under /dev/shm, held with `flock`. The kernel releases
//!    it when the holder dies, however it dies.
//! 2. A named mutex, modeled as an exclusively-created marker file in
//!    /dev/shm that only a clean `Drop` removes. A crash leaves it
//!    behind.
//!
//! The asymmetry is the point: if the file lock is taken, a live process
//! owns the channel; if only the named mutex is taken, a previous owner
//! crashed and left stale channel state that needs manual cleanup.

use std::ffi::CString;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::RocError;
use crate::hw::paths;
use crate::pci::PciAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Fail immediately if either lock is held.
    Try,
    /// Block until both locks are acquired. Deadlock-free because every
    /// acquirer takes the two locks in the same order.
    Wait,
}

const WAIT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive ownership of one channel; both locks release on drop.
#[derive(Debug)]
pub struct ChannelLock {
    file: FileLock,
    mutex: NamedMutex,
}

impl ChannelLock {
    /// All-or-nothing: on failure nothing stays held (a partially
    /// acquired file lock is released by its drop).
    pub fn acquire(
        address: PciAddress,
        channel: u32,
        mode: LockMode,
    ) -> Result<Self, RocError> {
        let file = FileLock::acquire(paths::lock_path(address, channel), mode)?;
        let mutex = match NamedMutex::acquire(
            paths::mutex_name(address, channel),
            paths::mutex_path(address, channel),
            mode,
        ) {
            Ok(mutex) => mutex,
            Err(e) => {
                if matches!(e, RocError::NamedMutexLock { .. }) {
                    // File lock was free but the mutex is held: nobody is
                    // alive to hold it, so a previous owner crashed.
                    warn!(
                        "channel {channel} on {address}: file lock free but named mutex held; \
                         a previous owner likely crashed"
                    );
                }
                return Err(e);
            }
        };
        debug!("locked channel {channel} on {address}");
        Ok(Self { file, mutex })
    }

    pub fn lock_path(&self) -> &str {
        &self.file.path
    }

    pub fn mutex_name(&self) -> &str {
        &self.mutex.name
    }
}

#[derive(Debug)]
struct FileLock {
    fd: libc::c_int,
    path: String,
}

impl FileLock {
    fn acquire(path: String, mode: LockMode) -> Result<Self, RocError> {
        let c_path = CString::new(path.as_str())
            .map_err(|_| RocError::Parameter("invalid path (contains NUL)"))?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o600) };
        if fd < 0 {
            return Err(RocError::Io(std::io::Error::last_os_error()));
        }
        let op = match mode {
            LockMode::Try => libc::LOCK_EX | libc::LOCK_NB,
            LockMode::Wait => libc::LOCK_EX,
        };
        if unsafe { libc::flock(fd, op) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return if err.kind() == std::io::ErrorKind::WouldBlock {
                Err(RocError::FileLock { path })
            } else {
                Err(RocError::Io(err))
            };
        }
        Ok(Self { fd, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock.
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[derive(Debug)]
struct NamedMutex {
    name: String,
    path: String,
}

impl NamedMutex {
    fn acquire(name: String, path: String, mode: LockMode) -> Result<Self, RocError> {
        let c_path = CString::new(path.as_str())
            .map_err(|_| RocError::Parameter("invalid path (contains NUL)"))?;
        loop {
            let fd = unsafe {
                libc::open(
                    c_path.as_ptr(),
                    libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL,
                    0o600,
                )
            };
            if fd >= 0 {
                unsafe {
                    libc::close(fd);
                }
                return Ok(Self { name, path });
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(RocError::Io(err));
            }
            match mode {
                LockMode::Try => return Err(RocError::NamedMutexLock { name }),
                LockMode::Wait => thread::sleep(WAIT_RETRY_INTERVAL),
            }
        }
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        if let Ok(c_path) = CString::new(self.path.as_str()) {
            unsafe {
                libc::unlink(c_path.as_ptr());
            }
        }
    }
}
