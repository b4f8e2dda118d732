pub mod iterator;

pub use iterator::{KvMap, MapIterator};

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::iterator::{MergeIterator, StorageIterator};
use crate::pool::FlushPool;
use crate::types::KeyValue;

/// Persists a memstore snapshot. Implemented by the disk store.
pub trait Flusher: Send + Sync {
    fn flush(&self, iter: &mut dyn StorageIterator) -> Result<()>;
}

/// Who owns the flush right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlushState {
    /// No flush outstanding.
    Idle = 0,
    /// A writer won the race and is deciding whether to swap.
    FlushPending = 1,
    /// `immutable` holds a snapshot that a worker is writing out.
    Flushing = 2,
}

impl FlushState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FlushState::Idle,
            1 => FlushState::FlushPending,
            _ => FlushState::Flushing,
        }
    }
}

struct Maps {
    active: Arc<KvMap>,
    immutable: Arc<KvMap>,
}

/// In-memory sorted buffer for writes.
///
/// Every applied write lands in `active`. When its size passes the limit the
/// map is swapped into `immutable` and flushed to disk by a pool worker,
/// while a fresh `active` keeps taking writes. Only one flush is ever
/// outstanding; a writer that finds the store full while a flush is running
/// gets [`Error::MemStoreFull`] and must retry later.
///
/// Deletes are plain records with [`Op::Delete`](crate::types::Op::Delete);
/// older versions may live on disk, so nothing is ever removed in place.
pub struct MemStore {
    maps: RwLock<Maps>,
    data_size: AtomicUsize,
    state: AtomicU8,
    max_size: usize,
    flush_max_retries: u32,
    flusher: Arc<dyn Flusher>,
    pool: Arc<FlushPool>,
    failed_flushes: AtomicU64,
}

impl MemStore {
    pub fn new(
        max_size: usize,
        flush_max_retries: u32,
        flusher: Arc<dyn Flusher>,
        pool: Arc<FlushPool>,
    ) -> Arc<Self> {
        Arc::new(MemStore {
            maps: RwLock::new(Maps {
                active: Arc::new(KvMap::new()),
                immutable: Arc::new(KvMap::new()),
            }),
            data_size: AtomicUsize::new(0),
            state: AtomicU8::new(FlushState::Idle as u8),
            max_size,
            flush_max_retries: flush_max_retries.max(1),
            flusher,
            pool,
            failed_flushes: AtomicU64::new(0),
        })
    }

    /// Insert a record, starting a flush when the active map passes the limit.
    pub fn add(self: &Arc<Self>, kv: KeyValue) -> Result<()> {
        if self.data_size() > self.max_size && self.flush_state() != FlushState::Idle {
            return Err(Error::MemStoreFull);
        }

        {
            let maps = self.maps.read();
            let size = kv.serialized_size();
            let replaced = maps.active.get(&kv).map(|e| e.key().serialized_size());
            maps.active.insert(kv, ());
            match replaced {
                Some(old) if old > size => self.data_size.fetch_sub(old - size, Ordering::AcqRel),
                Some(old) => self.data_size.fetch_add(size - old, Ordering::AcqRel),
                None => self.data_size.fetch_add(size, Ordering::AcqRel),
            };
        }

        if self.data_size() > self.max_size {
            self.try_start_flush();
        }
        Ok(())
    }

    /// Become the flush initiator if nobody else is, then re-check the size
    /// under the exclusive lock before swapping. Losing the race is fine: the
    /// winner flushes everything that was inserted before its swap.
    fn try_start_flush(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(
                FlushState::Idle as u8,
                FlushState::FlushPending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        {
            let mut maps = self.maps.write();
            if self.data_size() <= self.max_size {
                self.set_state(FlushState::FlushPending, FlushState::Idle);
                return;
            }
            maps.immutable = std::mem::replace(&mut maps.active, Arc::new(KvMap::new()));
            self.data_size.store(0, Ordering::Release);
            self.set_state(FlushState::FlushPending, FlushState::Flushing);
        }

        let store = Arc::clone(self);
        if let Err(e) = self.pool.submit(move || store.run_flush()) {
            // The snapshot stays in `immutable`; flush_sync picks it up at close.
            error!(error = %e, "could not schedule memstore flush");
        }
    }

    fn set_state(&self, from: FlushState, to: FlushState) {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            error!(
                expected = ?from,
                actual = ?self.flush_state(),
                "unexpected memstore flush state"
            );
            self.state.store(to as u8, Ordering::Release);
        }
    }

    fn run_flush(&self) {
        let snapshot = Arc::clone(&self.maps.read().immutable);
        match self.flush_with_retries(&snapshot) {
            Ok(()) => {
                self.maps.write().immutable = Arc::new(KvMap::new());
                self.set_state(FlushState::Flushing, FlushState::Idle);
            }
            Err(e) => {
                // Stay in Flushing: writers keep seeing a full memstore.
                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "memstore flush abandoned");
            }
        }
    }

    fn flush_with_retries(&self, map: &Arc<KvMap>) -> Result<()> {
        for attempt in 1..=self.flush_max_retries {
            let mut iter = MapIterator::new(Arc::clone(map), u64::MAX);
            match self.flusher.flush(&mut iter) {
                Ok(()) => {
                    debug!(records = map.len(), attempt, "memstore snapshot flushed");
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "memstore flush failed"),
            }
        }
        Err(Error::FlushFailed {
            attempts: self.flush_max_retries,
        })
    }

    /// Flush whatever is left in both maps on the calling thread.
    /// Used at close, after writers and the pool have stopped.
    pub fn flush_sync(&self) -> Result<()> {
        let (active, immutable) = {
            let maps = self.maps.read();
            (Arc::clone(&maps.active), Arc::clone(&maps.immutable))
        };
        for map in [&immutable, &active] {
            if !map.is_empty() {
                self.flush_with_retries(map)?;
            }
        }

        let mut maps = self.maps.write();
        maps.active = Arc::new(KvMap::new());
        maps.immutable = Arc::new(KvMap::new());
        self.data_size.store(0, Ordering::Release);
        self.state.store(FlushState::Idle as u8, Ordering::Release);
        Ok(())
    }

    /// Read view over both maps at `version`. The maps are captured together,
    /// so a concurrent swap cannot hide a record from this iterator.
    pub fn iter(&self, version: u64) -> MergeIterator {
        let maps = self.maps.read();
        MergeIterator::new(vec![
            Box::new(MapIterator::new(Arc::clone(&maps.active), version)),
            Box::new(MapIterator::new(Arc::clone(&maps.immutable), version)),
        ])
    }

    pub fn data_size(&self) -> usize {
        self.data_size.load(Ordering::Acquire)
    }

    pub fn flush_state(&self) -> FlushState {
        FlushState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_flushing(&self) -> bool {
        self.flush_state() != FlushState::Idle
    }

    /// Flushes that gave up after exhausting their retries.
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }

    /// Records held across both maps.
    pub fn len(&self) -> usize {
        let maps = self.maps.read();
        maps.active.len() + maps.immutable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
