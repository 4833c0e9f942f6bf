//! Channel locking and shared-memory mapping (Linux only).

#![cfg(all(feature = "hw", target_os = "linux"))]

use rocdma::error::RocError;
use rocdma::hw::lock::{ChannelLock, LockMode};
use rocdma::hw::memory::MappedRegion;
use rocdma::hw::paths;
use rocdma::pci::PciAddress;

fn test_address() -> PciAddress {
    // Deliberately improbable address so concurrent test runs and real
    // channels cannot collide.
    PciAddress::new(0xfe, 0x1f, 7).unwrap()
}

#[test]
fn path_layout() {
    let address = test_address();
    assert_eq!(
        paths::lock_path(address, 3),
        "/dev/shm/AliceO2_RoC_fe:1f.7_Channel_3.lock"
    );
    assert_eq!(
        paths::fifo_path(address, 3),
        "/dev/shm/AliceO2_RoC_fe:1f.7_Channel_3_fifo"
    );
    assert_eq!(
        paths::mutex_name(address, 3),
        "AliceO2_RoC_fe:1f.7_Channel_3_Mutex"
    );
}

#[test]
fn lock_is_exclusive_and_released_on_drop() {
    let address = test_address();
    let lock = ChannelLock::acquire(address, 0, LockMode::Try).unwrap();

    // Second try-acquire fails on the file lock: a live holder exists.
    match ChannelLock::acquire(address, 0, LockMode::Try) {
        Err(RocError::FileLock { path }) => {
            assert_eq!(path, paths::lock_path(address, 0));
        }
        other => panic!("expected FileLock error, got {other:?}"),
    }

    drop(lock);
    let relock = ChannelLock::acquire(address, 0, LockMode::Try).unwrap();
    drop(relock);
}

#[test]
fn stale_mutex_is_reported_as_crash_indicator() {
    let address = test_address();
    let mutex_path = paths::mutex_path(address, 1);
    // Simulate a crashed holder: the marker file exists but nobody holds
    // the file lock.
    std::fs::write(&mutex_path, b"").unwrap();

    match ChannelLock::acquire(address, 1, LockMode::Try) {
        Err(RocError::NamedMutexLock { name }) => {
            assert_eq!(name, paths::mutex_name(address, 1));
        }
        other => panic!("expected NamedMutexLock error, got {other:?}"),
    }

    // Manual cleanup (what the error message tells the operator to do)
    // makes the channel lockable again.
    std::fs::remove_file(&mutex_path).unwrap();
    let lock = ChannelLock::acquire(address, 1, LockMode::Try).unwrap();
    drop(lock);
}

#[test]
fn locks_are_independent_per_channel() {
    let address = test_address();
    let lock_a = ChannelLock::acquire(address, 4, LockMode::Try).unwrap();
    let lock_b = ChannelLock::acquire(address, 5, LockMode::Try).unwrap();
    drop(lock_a);
    drop(lock_b);
}

#[test]
fn mapped_region_is_shared_and_sized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("region");
    let path = path.to_str().unwrap();

    let region = MappedRegion::create(path, 4096).unwrap();
    assert_eq!(region.len(), 4096);
    unsafe {
        region.ptr().write(0xa5);
        region.ptr().add(4095).write(0x5a);
    }
    drop(region);

    // The backing file kept the bytes.
    let contents = std::fs::read(path).unwrap();
    assert_eq!(contents.len(), 4096);
    assert_eq!(contents[0], 0xa5);
    assert_eq!(contents[4095], 0x5a);

    assert!(matches!(
        MappedRegion::create(path, 0),
        Err(RocError::Parameter(_))
    ));
}
