use std::cmp::Ordering;

use bytes::Bytes;

use crate::bloom::BloomFilter;
use crate::codec::{self, Decoder, I32_SIZE, I64_SIZE};
use crate::error::Result;
use crate::sstable::BLOOM_FILTER_HASH_COUNT;
use crate::types::KeyValue;

/// An entry in the block index: where a block lives, the last record it
/// holds and the bloom filter over its keys.
///
/// ```text
/// ┌────────────────────┬──────────────┬────────────┬─────────┬───────────┐
/// │ last KeyValue      │ offset (8B)  │ size (8B)  │ bfLen(4)│ bloom     │
/// └────────────────────┴──────────────┴────────────┴─────────┴───────────┘
/// ```
///
/// Ordered by `last_kv`, which makes a sorted index directly searchable for
/// the first block that may hold a target record.
#[derive(Debug, Clone)]
pub struct BlockMeta {
    pub last_kv: KeyValue,
    pub offset: u64,
    pub size: u64,
    pub bloom: Bytes,
}

impl BlockMeta {
    pub fn new(last_kv: KeyValue, offset: u64, size: u64, bloom: Bytes) -> Self {
        BlockMeta {
            last_kv,
            offset,
            size,
            bloom,
        }
    }

    pub fn serialized_size(&self) -> usize {
        self.last_kv.serialized_size() + I64_SIZE + I64_SIZE + I32_SIZE + self.bloom.len()
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        self.last_kv.encode_to(buf);
        buf.extend_from_slice(&codec::encode_u64(self.offset));
        buf.extend_from_slice(&codec::encode_u64(self.size));
        buf.extend_from_slice(&codec::encode_u32(self.bloom.len() as u32));
        buf.extend_from_slice(&self.bloom);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_from(&mut Decoder::new(data))
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self> {
        let last_kv = KeyValue::decode_from(dec)?;
        let offset = dec.u64()?;
        let size = dec.u64()?;
        let bloom_len = dec.u32()? as usize;
        let bloom = Bytes::copy_from_slice(dec.bytes(bloom_len)?);
        Ok(BlockMeta {
            last_kv,
            offset,
            size,
            bloom,
        })
    }

    /// Parse a whole serialized index (back-to-back entries).
    pub fn decode_index(data: &[u8]) -> Result<Vec<BlockMeta>> {
        let mut dec = Decoder::new(data);
        let mut metas = Vec::new();
        while dec.remaining() > 0 {
            metas.push(Self::decode_from(&mut dec)?);
        }
        Ok(metas)
    }

    pub fn bloom_filter(&self) -> BloomFilter {
        BloomFilter::from_bytes(BLOOM_FILTER_HASH_COUNT, self.bloom.clone())
    }
}

impl PartialEq for BlockMeta {
    fn eq(&self, other: &Self) -> bool {
        self.last_kv == other.last_kv
            && self.offset == other.offset
            && self.size == other.size
            && self.bloom == other.bloom
    }
}

impl Eq for BlockMeta {}

impl PartialOrd for BlockMeta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlockMeta {
    fn cmp(&self, other: &Self) -> Ordering {
        self.last_kv
            .cmp(&other.last_kv)
            .then_with(|| self.offset.cmp(&other.offset))
    }
}
