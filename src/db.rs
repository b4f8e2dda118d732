use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::compaction::Compactor;
use crate::error::{Error, Result};
use crate::filter::KeyValueFilter;
use crate::iterator::{MergeIterator, ScanIterator, StorageIterator};
use crate::memtable::{Flusher, MemStore};
use crate::options::Options;
use crate::pool::FlushPool;
use crate::store::DiskStore;
use crate::types::{Key, KeyValue, Value};
use crate::wal::Wal;

/// Point-in-time counters of a running engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub live_files: usize,
    pub retired_files: usize,
    pub memstore_bytes: usize,
    pub is_flushing: bool,
    /// Highest sequence id applied and readable.
    pub visible_sequence: u64,
    /// Highest sequence id handed out by the log.
    pub last_sequence: u64,
    pub cache_bytes: usize,
    pub cache_blocks: usize,
    pub failed_flushes: u64,
}

/// The storage engine.
///
/// Writes go through the write-ahead log, which assigns sequence ids; a log
/// consumer thread applies them to the memstore in order and advances the
/// visible watermark. `put`/`delete` return once their entry is applied, so
/// a scan started afterwards sees it.
///
/// Threads: log writer, log tailer (Sync/Fsync), log consumer, compactor and
/// the flush pool.
pub struct DB {
    options: Options,
    wal: Arc<Wal>,
    memstore: Arc<MemStore>,
    disk_store: Arc<DiskStore>,
    pool: Arc<FlushPool>,
    compactor: Compactor,
    applier: Mutex<Option<JoinHandle<()>>>,
    visible: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl DB {
    pub fn open(options: Options) -> Result<Self> {
        std::fs::create_dir_all(&options.data_dir)?;
        std::fs::create_dir_all(&options.log_dir)?;

        let disk_store = Arc::new(DiskStore::open(
            &options.data_dir,
            options.max_disk_files,
            options.block_cache_capacity,
        )?);
        // The log is not replayed, so everything durable lives in the disk files.
        let last_sequence = disk_store.max_sequence_id()?;
        let visible = Arc::new(AtomicU64::new(last_sequence));

        let pool = Arc::new(FlushPool::new("memstore-flush", options.flush_pool_size)?);
        let flusher: Arc<dyn Flusher> = disk_store.clone();
        let memstore = MemStore::new(
            options.max_memstore_size,
            options.flush_max_retries,
            flusher,
            Arc::clone(&pool),
        );

        let wal = Arc::new(Wal::open(&options, last_sequence)?);

        let applier = {
            let consumer = LogConsumer {
                queue: wal.read_queue(),
                wal: Arc::clone(&wal),
                memstore: Arc::clone(&memstore),
                visible: Arc::clone(&visible),
                max_retries: options.put_max_retries.max(1),
                backoff: options.put_retry_backoff,
            };
            std::thread::Builder::new()
                .name("log-consumer".into())
                .spawn(move || consumer.run())?
        };

        let compactor = Compactor::start(Arc::clone(&disk_store), options.compaction_interval)?;

        info!(
            data_dir = ?options.data_dir,
            wal_level = ?options.wal_level,
            files = disk_store.num_files(),
            last_sequence,
            "engine opened"
        );
        Ok(DB {
            options,
            wal,
            memstore,
            disk_store,
            pool,
            compactor,
            applier: Mutex::new(Some(applier)),
            visible,
            closed: AtomicBool::new(false),
        })
    }

    /// Write `key = value`. Returns the sequence id once the write is applied.
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<u64> {
        self.check_open()?;
        self.wal.put(key, value)
    }

    /// Delete `key`. Returns the sequence id of the tombstone once applied.
    pub fn delete(&self, key: impl Into<Key>) -> Result<u64> {
        self.check_open()?;
        self.wal.delete(key)
    }

    /// Flush the log buffer (and fsync under [`WalLevel::Fsync`](crate::WalLevel::Fsync)).
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        self.wal.sync()
    }

    /// Resolved records matching `filter`, in key order. A filter without a
    /// version reads the snapshot current at this call.
    pub fn scan(&self, filter: KeyValueFilter) -> Result<ScanIterator> {
        let stop = filter.end().cloned();
        let merged = self.merged(filter)?;
        Ok(ScanIterator::new(Box::new(merged), stop))
    }

    /// The record for the filter's key, if it has one visible at the
    /// filter's version and it is not deleted.
    pub fn get(&self, filter: KeyValueFilter) -> Result<Option<KeyValue>> {
        let Some(key) = filter.key().cloned() else {
            return Err(Error::InvalidArgument("get needs a filter with a key".into()));
        };
        // Nothing after the key's own versions matters.
        let mut stop = key.to_vec();
        stop.push(0);

        let merged = self.merged(filter)?;
        let mut scan = ScanIterator::new(Box::new(merged), Some(Bytes::from(stop)));
        match scan.next().transpose()? {
            Some(kv) if kv.key() == key.as_ref() => Ok(Some(kv)),
            _ => Ok(None),
        }
    }

    /// Memstore first: a flush finishing in between cannot hide a record,
    /// since the memstore snapshot keeps the flushed map alive.
    fn merged(&self, mut filter: KeyValueFilter) -> Result<MergeIterator> {
        self.check_open()?;
        filter.set_version_if_absent(self.visible_sequence());

        let memory = self.memstore.iter(filter.version_ceiling());
        let disk = self.disk_store.iter(&filter)?;
        let mut merged = MergeIterator::new(vec![Box::new(memory), Box::new(disk)]);
        if let Some(target) = filter.seek_target() {
            merged.seek(&target)?;
        }
        Ok(merged)
    }

    pub fn visible_sequence(&self) -> u64 {
        self.visible.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Stats {
        let cache = self.disk_store.cache();
        Stats {
            live_files: self.disk_store.num_files(),
            retired_files: self.disk_store.num_retired(),
            memstore_bytes: self.memstore.data_size(),
            is_flushing: self.memstore.is_flushing(),
            visible_sequence: self.visible_sequence(),
            last_sequence: self.wal.last_sequence(),
            cache_bytes: cache.occupancy(),
            cache_blocks: cache.len(),
            failed_flushes: self.memstore.failed_flushes(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn disk_store(&self) -> &Arc<DiskStore> {
        &self.disk_store
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Drain the log, stop the background threads, flush what is left in
    /// the memstore and close the disk files. Fails if a scan still holds a
    /// file open. Safe to call twice.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.wal.close();
        if let Some(handle) = self.applier.lock().take() {
            if handle.join().is_err() {
                error!("log consumer panicked");
            }
        }
        self.wal.abandon_pending();

        self.compactor.stop();
        self.pool.shutdown();
        let flushed = self.memstore.flush_sync();
        if let Err(e) = &flushed {
            error!(error = %e, "final memstore flush failed");
        }
        self.disk_store.sweep_retired()?;
        self.disk_store.close()?;

        info!(visible_sequence = self.visible_sequence(), "engine closed");
        flushed
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "closing engine on drop failed");
        }
    }
}

/// Applies log entries to the memstore, in sequence order.
struct LogConsumer {
    queue: Receiver<KeyValue>,
    wal: Arc<Wal>,
    memstore: Arc<MemStore>,
    visible: Arc<AtomicU64>,
    max_retries: u32,
    backoff: Duration,
}

impl LogConsumer {
    /// Runs until the log is closed and its read queue drained.
    fn run(self) {
        for kv in self.queue.iter() {
            let seq = kv.sequence_id();
            let result = self.apply(kv);
            if result.is_ok() {
                // Never moves backwards.
                self.visible.fetch_max(seq, Ordering::AcqRel);
            }
            self.wal.notify_applied(seq, result);
        }
    }

    fn apply(&self, kv: KeyValue) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.memstore.add(kv.clone()) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_retries => {
                    let wait = self.backoff.saturating_mul(1 << attempt.min(16));
                    warn!(seq = kv.sequence_id(), attempt, ?wait, error = %e, "apply failed, backing off");
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(e) => {
                    error!(seq = kv.sequence_id(), attempts = attempt + 1, error = %e, "giving up on log entry");
                    return Err(e);
                }
            }
        }
    }
}
