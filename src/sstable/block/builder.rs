use bytes::Bytes;

use crate::bloom::BloomFilterBuilder;
use crate::codec;
use crate::sstable::block::BLOCK_OVERHEAD;
use crate::sstable::{BLOOM_FILTER_BITS_PER_KEY, BLOOM_FILTER_HASH_COUNT};
use crate::types::KeyValue;

/// Accumulates sorted key-values and serializes them into a block.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────┐
/// │ kv_count (4B)                                │
/// │ KeyValue 0                                   │
/// │ ...                                          │
/// │ KeyValue N-1                                 │
/// │ checksum (4B, CRC32 over the KeyValue bytes) │
/// └──────────────────────────────────────────────┘
/// ```
///
/// Records are serialized as they arrive so the checksum can be computed
/// incrementally; the bloom filter over the block's keys is built on seal.
pub struct BlockBuilder {
    data: Vec<u8>,
    count: u32,
    hasher: crc32fast::Hasher,
    bloom: BloomFilterBuilder,
    last_kv: Option<KeyValue>,
    block_size: usize,
}

/// A finished block ready to be written, plus what its index entry needs.
pub struct SealedBlock {
    pub data: Vec<u8>,
    pub last_kv: KeyValue,
    pub bloom: Bytes,
}

impl BlockBuilder {
    /// Create a new block builder with target block size.
    pub fn new(block_size: usize) -> Self {
        BlockBuilder {
            data: Vec::new(),
            count: 0,
            hasher: crc32fast::Hasher::new(),
            bloom: BloomFilterBuilder::new(BLOOM_FILTER_HASH_COUNT, BLOOM_FILTER_BITS_PER_KEY),
            last_kv: None,
            block_size,
        }
    }

    /// Add a key-value to the block.
    /// Returns false if the block is full (adding would reach block_size).
    /// The first entry is always accepted so a block is never empty.
    /// Entries MUST be added in KeyValue order.
    pub fn add(&mut self, kv: &KeyValue) -> bool {
        if self.count > 0 && self.size() + kv.serialized_size() >= self.block_size {
            return false;
        }
        debug_assert!(self.last_kv.as_ref().is_none_or(|last| last <= kv));

        let start = self.data.len();
        kv.encode_to(&mut self.data);
        self.hasher.update(&self.data[start..]);
        self.bloom.add_key(kv.key_bytes().clone());
        self.last_kv = Some(kv.clone());
        self.count += 1;
        true
    }

    /// Serialized size of the block if sealed now.
    pub fn size(&self) -> usize {
        BLOCK_OVERHEAD + self.data.len()
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Finalize the block. Returns None for an empty builder.
    pub fn build(self) -> Option<SealedBlock> {
        let last_kv = self.last_kv?;
        let bloom = self.bloom.build().as_bytes().clone();

        let mut data = Vec::with_capacity(BLOCK_OVERHEAD + self.data.len());
        data.extend_from_slice(&codec::encode_u32(self.count));
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&codec::encode_u32(self.hasher.finalize()));

        Some(SealedBlock { data, last_kv, bloom })
    }
}
