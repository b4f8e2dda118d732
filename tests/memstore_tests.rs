// MemStore tests
// Tests for flush triggering, back-pressure, failed flushes and snapshot reads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lsmkv::iterator::StorageIterator;
use lsmkv::memtable::{FlushState, Flusher, MemStore};
use lsmkv::pool::FlushPool;
use lsmkv::types::KeyValue;
use lsmkv::Error;

/// Records every flushed snapshot. Can be held back or told to fail.
#[derive(Default)]
struct RecordingFlusher {
    flushed: Mutex<Vec<Vec<KeyValue>>>,
    attempts: AtomicUsize,
    hold: AtomicBool,
    fail: AtomicBool,
}

impl RecordingFlusher {
    fn total_records(&self) -> usize {
        self.flushed.lock().unwrap().iter().map(|s| s.len()).sum()
    }

    fn snapshots(&self) -> usize {
        self.flushed.lock().unwrap().len()
    }
}

impl Flusher for RecordingFlusher {
    fn flush(&self, iter: &mut dyn StorageIterator) -> lsmkv::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        while self.hold.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("disk unavailable")));
        }
        let mut kvs = Vec::new();
        while iter.is_valid() {
            kvs.push(iter.kv().clone());
            iter.next()?;
        }
        self.flushed.lock().unwrap().push(kvs);
        Ok(())
    }
}

fn kv(i: u64) -> KeyValue {
    KeyValue::put(format!("key_{:05}", i).into_bytes(), vec![b'v'; 20], i + 1)
}

fn memstore(max_size: usize, flusher: &Arc<RecordingFlusher>) -> (Arc<MemStore>, Arc<FlushPool>) {
    let pool = Arc::new(FlushPool::new("test-flush", 2).unwrap());
    let store = MemStore::new(max_size, 3, Arc::clone(flusher) as Arc<dyn Flusher>, Arc::clone(&pool));
    (store, pool)
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(2));
    }
}

// =============================================================================
// Test 1: Inserts below the limit never flush
// =============================================================================
#[test]
fn below_limit_no_flush() {
    let flusher = Arc::new(RecordingFlusher::default());
    let (store, _pool) = memstore(1 << 20, &flusher);
    for i in 0..50 {
        store.add(kv(i)).unwrap();
    }
    assert_eq!(store.len(), 50);
    assert_eq!(store.data_size(), 50 * kv(0).serialized_size());
    assert_eq!(store.flush_state(), FlushState::Idle);
    assert_eq!(flusher.attempts.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Test 2: Passing the limit hands a snapshot to the flusher
// =============================================================================
#[test]
fn passing_limit_flushes_snapshot() {
    let flusher = Arc::new(RecordingFlusher::default());
    let record = kv(0).serialized_size();
    let (store, _pool) = memstore(record * 5, &flusher);

    for i in 0..6 {
        store.add(kv(i)).unwrap();
    }
    wait_until("flush", || flusher.snapshots() == 1);
    wait_until("idle", || store.flush_state() == FlushState::Idle);

    let flushed = flusher.flushed.lock().unwrap()[0].clone();
    assert_eq!(flushed.len(), 6);
    assert!(flushed.windows(2).all(|w| w[0] < w[1]));
    assert!(store.is_empty());
    assert_eq!(store.data_size(), 0);
}

// =============================================================================
// Test 3: A full memstore with a flush in progress pushes back
// =============================================================================
#[test]
fn full_while_flushing() {
    let flusher = Arc::new(RecordingFlusher::default());
    flusher.hold.store(true, Ordering::SeqCst);
    let record = kv(0).serialized_size();
    let (store, _pool) = memstore(record * 4, &flusher);

    let mut i = 0;
    let mut pushed_back = false;
    while i < 100 {
        match store.add(kv(i)) {
            Ok(()) => i += 1,
            Err(Error::MemStoreFull) => {
                pushed_back = true;
                break;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(pushed_back, "memstore never reported full");
    assert_eq!(store.flush_state(), FlushState::Flushing);
    assert!(Error::MemStoreFull.is_retryable());

    flusher.hold.store(false, Ordering::SeqCst);
    wait_until("flush to finish", || store.flush_state() == FlushState::Idle);
    store.add(kv(i)).unwrap();
}

// =============================================================================
// Test 4: Records stay readable while their snapshot is being flushed
// =============================================================================
#[test]
fn snapshot_readable_during_flush() {
    let flusher = Arc::new(RecordingFlusher::default());
    flusher.hold.store(true, Ordering::SeqCst);
    let record = kv(0).serialized_size();
    let (store, _pool) = memstore(record * 3, &flusher);

    for i in 0..4 {
        store.add(kv(i)).unwrap();
    }
    wait_until("flush to start", || flusher.attempts.load(Ordering::SeqCst) == 1);
    store.add(kv(10)).unwrap();

    let mut iter = store.iter(u64::MAX);
    let mut keys = Vec::new();
    while iter.is_valid() {
        keys.push(iter.kv().sequence_id());
        iter.next().unwrap();
    }
    assert_eq!(keys, vec![1, 2, 3, 4, 11]);

    // Version ceiling applies across both maps
    let mut iter = store.iter(2);
    let mut count = 0;
    while iter.is_valid() {
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 2);

    flusher.hold.store(false, Ordering::SeqCst);
    wait_until("idle", || store.flush_state() == FlushState::Idle);
}

// =============================================================================
// Test 5: Exhausted retries leave the store flushing and count the failure
// =============================================================================
#[test]
fn failed_flush_stays_flushing() {
    let flusher = Arc::new(RecordingFlusher::default());
    flusher.fail.store(true, Ordering::SeqCst);
    let record = kv(0).serialized_size();
    let (store, _pool) = memstore(record * 2, &flusher);

    for i in 0..3 {
        store.add(kv(i)).unwrap();
    }
    wait_until("flush to give up", || store.failed_flushes() == 1);
    assert_eq!(flusher.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.flush_state(), FlushState::Flushing);

    // The unflushed snapshot is still readable
    assert_eq!(store.len(), 3);

    // Fill the fresh map past the limit: writers are now pushed back
    let mut saw_full = false;
    for i in 3..20 {
        if matches!(store.add(kv(i)), Err(Error::MemStoreFull)) {
            saw_full = true;
            break;
        }
    }
    assert!(saw_full);
}

// =============================================================================
// Test 6: flush_sync writes out both maps and resets the store
// =============================================================================
#[test]
fn flush_sync_drains_everything() {
    let flusher = Arc::new(RecordingFlusher::default());
    let (store, pool) = memstore(1 << 20, &flusher);
    for i in 0..10 {
        store.add(kv(i)).unwrap();
    }
    pool.shutdown();
    store.flush_sync().unwrap();

    assert_eq!(flusher.total_records(), 10);
    assert!(store.is_empty());
    assert_eq!(store.flush_state(), FlushState::Idle);

    // Nothing to flush: no new snapshot
    store.flush_sync().unwrap();
    assert_eq!(flusher.snapshots(), 1);
}

// =============================================================================
// Test 7: flush_sync reports failure after its retries
// =============================================================================
#[test]
fn flush_sync_failure() {
    let flusher = Arc::new(RecordingFlusher::default());
    flusher.fail.store(true, Ordering::SeqCst);
    let (store, pool) = memstore(1 << 20, &flusher);
    store.add(kv(1)).unwrap();
    pool.shutdown();

    assert!(matches!(store.flush_sync(), Err(Error::FlushFailed { attempts: 3 })));
    assert_eq!(store.len(), 1);
}

// =============================================================================
// Test 8: Concurrent writers lose nothing across several flushes
// =============================================================================
#[test]
fn concurrent_adds() {
    let flusher = Arc::new(RecordingFlusher::default());
    let record = kv(0).serialized_size();
    let (store, pool) = memstore(record * 50, &flusher);

    let mut handles = vec![];
    for t in 0..4u64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..250u64 {
                let kv = kv(t * 1000 + i);
                loop {
                    match store.add(kv.clone()) {
                        Ok(()) => break,
                        Err(Error::MemStoreFull) => thread::sleep(Duration::from_millis(1)),
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    wait_until("idle", || store.flush_state() == FlushState::Idle);
    pool.shutdown();
    store.flush_sync().unwrap();

    assert!(flusher.snapshots() >= 2);
    let mut all: Vec<KeyValue> = flusher.flushed.lock().unwrap().iter().flatten().cloned().collect();
    assert_eq!(all.len(), 1000);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 1000);
}
