use std::sync::Arc;

use crate::codec::Decoder;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::block::{CHECKSUM_SIZE, KV_COUNT_SIZE};
use crate::types::{KeyValue, EXHAUSTED};

/// A decoded block: its records in order plus their payload footprint.
/// This is the unit the block cache stores.
#[derive(Debug)]
pub struct Block {
    kvs: Vec<KeyValue>,
    memory_size: usize,
}

impl Block {
    pub fn new(kvs: Vec<KeyValue>) -> Self {
        let memory_size = kvs.iter().map(KeyValue::memory_size).sum();
        Block { kvs, memory_size }
    }

    /// Parse a block and verify its checksum. A mismatch is corruption.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < KV_COUNT_SIZE + CHECKSUM_SIZE {
            return Err(Error::Corruption(format!("block of {} bytes too short", data.len())));
        }
        let mut dec = Decoder::new(data);
        let count = dec.u32()? as usize;

        let body_start = dec.position();
        // A corrupt count must not drive the allocation; 17 bytes is the smallest record.
        let mut kvs = Vec::with_capacity(count.min(data.len() / 17));
        for _ in 0..count {
            kvs.push(KeyValue::decode_from(&mut dec)?);
        }
        let body_end = dec.position();

        let stored = dec.u32()?;
        let computed = crc32fast::hash(&data[body_start..body_end]);
        if stored != computed {
            return Err(Error::Corruption(format!(
                "block checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            )));
        }
        if dec.remaining() != 0 {
            return Err(Error::Corruption(format!(
                "{} trailing bytes after block checksum",
                dec.remaining()
            )));
        }

        Ok(Block::new(kvs))
    }

    pub fn kvs(&self) -> &[KeyValue] {
        &self.kvs
    }

    pub fn len(&self) -> usize {
        self.kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kvs.is_empty()
    }

    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    /// Iterate the records visible at `version`.
    pub fn iter(self: &Arc<Self>, version: u64) -> BlockIterator {
        let mut iter = BlockIterator {
            block: Arc::clone(self),
            version,
            pos: 0,
        };
        iter.skip_invisible();
        iter
    }
}

/// Cursor over one block, skipping records newer than the version ceiling.
pub struct BlockIterator {
    block: Arc<Block>,
    version: u64,
    pos: usize,
}

impl BlockIterator {
    fn skip_invisible(&mut self) {
        while self.pos < self.block.kvs.len() && self.block.kvs[self.pos].sequence_id() > self.version {
            self.pos += 1;
        }
    }
}

impl StorageIterator for BlockIterator {
    fn kv(&self) -> &KeyValue {
        self.block.kvs.get(self.pos).unwrap_or(&EXHAUSTED)
    }

    fn is_valid(&self) -> bool {
        self.pos < self.block.kvs.len()
    }

    fn next(&mut self) -> Result<()> {
        if self.is_valid() {
            self.pos += 1;
            self.skip_invisible();
        }
        Ok(())
    }

    /// Binary search for the first record >= target, then skip forward past
    /// records the version ceiling hides.
    fn seek(&mut self, target: &KeyValue) -> Result<()> {
        self.pos = self.block.kvs.partition_point(|kv| kv < target);
        self.skip_invisible();
        Ok(())
    }
}
