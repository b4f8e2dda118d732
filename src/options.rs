use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How far a write travels before its caller is released.
///
/// | Level  | Log file                                   |
/// |--------|--------------------------------------------|
/// | Skip   | never written                              |
/// | Async  | buffered, written when the buffer fills    |
/// | Sync   | written to the OS (write(2)) per entry     |
/// | Fsync  | written and forced to the device per entry |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalLevel {
    Skip,
    Async,
    Sync,
    Fsync,
}

impl WalLevel {
    /// Levels whose entries reach the apply queue by being read back from the log file.
    pub fn tails_log(self) -> bool {
        matches!(self, WalLevel::Sync | WalLevel::Fsync)
    }
}

/// Engine settings. Loading them from a file is left to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Directory holding `data.<id>` files.
    pub data_dir: PathBuf,
    /// Directory holding the write-ahead log.
    pub log_dir: PathBuf,
    /// Memstore size (serialized bytes) that triggers a flush.
    pub max_memstore_size: usize,
    /// Live disk file count above which the compactor merges everything.
    pub max_disk_files: usize,
    pub flush_max_retries: u32,
    /// Attempts the log consumer makes to apply one entry to the memstore.
    pub put_max_retries: u32,
    /// First backoff between apply attempts; doubled on each retry.
    pub put_retry_backoff: Duration,
    pub wal_buffer_size: usize,
    pub wal_level: WalLevel,
    /// Capacity of the block cache in decoded payload bytes.
    pub block_cache_capacity: usize,
    pub flush_pool_size: usize,
    /// Poll period of the compactor thread.
    pub compaction_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options::with_root("lsmkv")
    }
}

impl Options {
    /// Default settings with `data/` and `log/` under `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Options {
            data_dir: root.join("data"),
            log_dir: root.join("log"),
            max_memstore_size: 16 * 1024 * 1024,
            max_disk_files: 10,
            flush_max_retries: 10,
            put_max_retries: 10,
            put_retry_backoff: Duration::from_millis(100),
            wal_buffer_size: 1024 * 1024,
            wal_level: WalLevel::Sync,
            block_cache_capacity: 64 * 1024 * 1024,
            flush_pool_size: 5,
            compaction_interval: Duration::from_secs(1),
        }
    }

    pub fn with_max_memstore_size(mut self, bytes: usize) -> Self {
        self.max_memstore_size = bytes;
        self
    }

    pub fn with_max_disk_files(mut self, count: usize) -> Self {
        self.max_disk_files = count;
        self
    }

    pub fn with_flush_max_retries(mut self, retries: u32) -> Self {
        self.flush_max_retries = retries;
        self
    }

    pub fn with_put_max_retries(mut self, retries: u32) -> Self {
        self.put_max_retries = retries;
        self
    }

    pub fn with_put_retry_backoff(mut self, backoff: Duration) -> Self {
        self.put_retry_backoff = backoff;
        self
    }

    pub fn with_wal_buffer_size(mut self, bytes: usize) -> Self {
        self.wal_buffer_size = bytes;
        self
    }

    pub fn with_wal_level(mut self, level: WalLevel) -> Self {
        self.wal_level = level;
        self
    }

    pub fn with_block_cache_capacity(mut self, bytes: usize) -> Self {
        self.block_cache_capacity = bytes;
        self
    }

    pub fn with_flush_pool_size(mut self, threads: usize) -> Self {
        self.flush_pool_size = threads;
        self
    }

    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Path of the single log file.
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("base.log")
    }
}
