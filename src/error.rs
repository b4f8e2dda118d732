use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad magic, truncated buffer, ...).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The memstore is over capacity and a flush is already running.
    /// The caller should back off and retry.
    #[error("MemStore is full and a flush is in progress, retry later")]
    MemStoreFull,

    /// A request the engine can never satisfy, e.g. a key-value larger than a block.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A disk file was asked to close while iterators still reference it.
    #[error("cannot close {path:?}: {refs} readers still hold it")]
    FileInUse { path: PathBuf, refs: usize },

    /// Flushing a memstore snapshot failed on every attempt.
    #[error("flush failed after {attempts} attempts")]
    FlushFailed { attempts: u32 },

    /// The log, pool or engine has been shut down.
    #[error("storage engine is closed")]
    Closed,
}

impl Error {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::MemStoreFull)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
