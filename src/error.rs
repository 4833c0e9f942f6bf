use thiserror::Error;

use crate::crorc::card::CardError;

#[derive(Error, Debug)]
pub enum RocError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid parameter: {0}")]
    Parameter(&'static str),
    #[error("bad alignment: {0}")]
    Alignment(&'static str),
    #[error("transfer queue full")]
    QueueFull,
    #[error("ready queue empty")]
    QueueEmpty,
    #[error("superpage out of range: offset {offset} + size {size} exceeds DMA window of {window} bytes")]
    OutOfRange {
        offset: usize,
        size: usize,
        window: usize,
    },
    #[error("card error: {0}")]
    Card(#[from] CardError),
    /// The card reported a descriptor the engine cannot interpret.
    /// The channel is failed; reset and restart before reusing it.
    #[error("bad descriptor status {status:#010x} (length {length}, slot {index})")]
    DataArrival {
        status: i32,
        length: u32,
        index: usize,
    },
    #[error("channel file lock busy: another process holds {path}")]
    FileLock { path: String },
    /// The named mutex survives process death; finding it held while the
    /// file lock was free means a previous holder crashed.
    #[error("channel mutex {name} is stale (previous holder likely crashed; remove it manually)")]
    NamedMutexLock { name: String },
    #[error("scatter/gather segment too small for ready FIFO: {size} < {required} bytes")]
    Fifo { size: usize, required: usize },
}
