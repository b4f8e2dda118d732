use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::sstable::block::Block;

/// Identifies a block: the disk file it belongs to and its offset there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub file_id: u64,
    pub offset: u64,
}

impl BlockId {
    pub fn new(file_id: u64, offset: u64) -> Self {
        BlockId { file_id, offset }
    }
}

struct Inner {
    blocks: LruCache<BlockId, Arc<Block>>,
    occupancy: usize,
}

/// LRU cache of decoded blocks shared by every disk file of a store.
///
/// Capacity is measured in decoded payload bytes ([`Block::memory_size`]),
/// not file bytes. After an insert, least-recently-used blocks are evicted
/// until occupancy is back within capacity.
pub struct BlockCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        BlockCache {
            inner: Mutex::new(Inner {
                blocks: LruCache::unbounded(),
                occupancy: 0,
            }),
            capacity,
        }
    }

    /// Return the cached block, loading it with `load` on a miss.
    ///
    /// The load runs outside the lock, so two racing readers may both decode
    /// the same block; the first insert wins and the other copy is dropped.
    pub fn get_or_load<F>(&self, id: BlockId, load: F) -> Result<Arc<Block>>
    where
        F: FnOnce() -> Result<Block>,
    {
        if let Some(block) = self.inner.lock().blocks.get(&id) {
            return Ok(Arc::clone(block));
        }

        let loaded = Arc::new(load()?);

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.blocks.get(&id) {
            return Ok(Arc::clone(existing));
        }
        inner.occupancy += loaded.memory_size();
        inner.blocks.put(id, Arc::clone(&loaded));

        while inner.occupancy > self.capacity {
            match inner.blocks.pop_lru() {
                Some((evicted, block)) => {
                    inner.occupancy -= block.memory_size();
                    trace!(file_id = evicted.file_id, offset = evicted.offset, "evicted block");
                }
                None => break,
            }
        }
        Ok(loaded)
    }

    /// Drop every block of `file_id`. Called when the file is archived.
    pub fn evict_file(&self, file_id: u64) {
        let mut inner = self.inner.lock();
        let ids: Vec<BlockId> = inner
            .blocks
            .iter()
            .filter(|(id, _)| id.file_id == file_id)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(block) = inner.blocks.pop(&id) {
                inner.occupancy -= block.memory_size();
            }
        }
    }

    /// Whether `id` is cached. Does not touch recency.
    pub fn contains(&self, id: &BlockId) -> bool {
        self.inner.lock().blocks.contains(id)
    }

    pub fn occupancy(&self) -> usize {
        self.inner.lock().occupancy
    }

    pub fn len(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
