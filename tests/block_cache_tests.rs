// Block cache tests
// Tests for LRU eviction, occupancy accounting and concurrent loads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use lsmkv::cache::{BlockCache, BlockId};
use lsmkv::sstable::block::Block;
use lsmkv::types::KeyValue;
use lsmkv::Error;

/// A block whose memory footprint is exactly `size` bytes.
fn block_of(size: usize) -> Block {
    // memory_size = key.len() + 9 + value.len()
    assert!(size >= 10);
    Block::new(vec![KeyValue::put(&b"k"[..], vec![0u8; size - 10], 1)])
}

fn load(cache: &BlockCache, id: u64, size: usize) -> Arc<Block> {
    cache.get_or_load(BlockId::new(id, 0), || Ok(block_of(size))).unwrap()
}

// =============================================================================
// Test 1: Occupancy tracks inserted footprints
// =============================================================================
#[test]
fn occupancy_accounting() {
    let cache = BlockCache::new(1000);
    load(&cache, 1, 100);
    load(&cache, 2, 250);
    assert_eq!(cache.occupancy(), 350);
    assert_eq!(cache.len(), 2);
}

// =============================================================================
// Test 2: Exceeding capacity evicts the least recently used block first
// =============================================================================
#[test]
fn evicts_least_recently_used() {
    let cache = BlockCache::new(300);
    load(&cache, 1, 100);
    load(&cache, 2, 100);
    load(&cache, 3, 100);

    load(&cache, 4, 100);
    assert!(!cache.contains(&BlockId::new(1, 0)));
    assert!(cache.contains(&BlockId::new(2, 0)));
    assert!(cache.occupancy() <= 300);
}

// =============================================================================
// Test 3: A hit promotes the block out of eviction order
// =============================================================================
#[test]
fn hit_promotes_entry() {
    let cache = BlockCache::new(300);
    load(&cache, 1, 100);
    load(&cache, 2, 100);
    load(&cache, 3, 100);

    // Touch 1 so 2 becomes the oldest
    load(&cache, 1, 100);
    load(&cache, 4, 100);

    assert!(cache.contains(&BlockId::new(1, 0)));
    assert!(!cache.contains(&BlockId::new(2, 0)));
    assert!(cache.contains(&BlockId::new(3, 0)));
    assert!(cache.contains(&BlockId::new(4, 0)));
}

// =============================================================================
// Test 4: Hits do not call the loader
// =============================================================================
#[test]
fn hit_skips_loader() {
    let cache = BlockCache::new(1000);
    let loads = AtomicUsize::new(0);
    for _ in 0..5 {
        cache
            .get_or_load(BlockId::new(7, 42), || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(block_of(50))
            })
            .unwrap();
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Test 5: A failed load caches nothing and surfaces the error
// =============================================================================
#[test]
fn failed_load_not_cached() {
    let cache = BlockCache::new(1000);
    let result = cache.get_or_load(BlockId::new(1, 0), || Err(Error::Corruption("bad block".into())));
    assert!(matches!(result, Err(Error::Corruption(_))));
    assert!(cache.is_empty());
    assert_eq!(cache.occupancy(), 0);
}

// =============================================================================
// Test 6: Evicting a file drops only its blocks
// =============================================================================
#[test]
fn evict_file() {
    let cache = BlockCache::new(10_000);
    for offset in 0..3 {
        cache.get_or_load(BlockId::new(1, offset), || Ok(block_of(100))).unwrap();
        cache.get_or_load(BlockId::new(2, offset), || Ok(block_of(100))).unwrap();
    }
    cache.evict_file(1);
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.occupancy(), 300);
    assert!(!cache.contains(&BlockId::new(1, 0)));
    assert!(cache.contains(&BlockId::new(2, 2)));
}

// =============================================================================
// Test 7: Concurrent readers keep the cache consistent
// =============================================================================
#[test]
fn concurrent_loads() {
    let cache = Arc::new(BlockCache::new(2000));
    let mut handles = vec![];
    for t in 0..8u64 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for i in 0..200u64 {
                let id = BlockId::new((i + t) % 40, 0);
                let block = cache.get_or_load(id, || Ok(block_of(100))).unwrap();
                assert_eq!(block.memory_size(), 100);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(cache.occupancy() <= 2000);
    assert_eq!(cache.occupancy(), cache.len() * 100);
}
