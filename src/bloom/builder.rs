use bytes::Bytes;

use crate::bloom::BloomFilter;

/// Collects the keys of a block while it is being written, then builds the
/// block's bloom filter in one pass when the block is sealed.
pub struct BloomFilterBuilder {
    keys: Vec<Bytes>,
    num_hashes: u32,
    bits_per_key: usize,
}

impl BloomFilterBuilder {
    pub fn new(num_hashes: u32, bits_per_key: usize) -> Self {
        BloomFilterBuilder {
            keys: Vec::new(),
            num_hashes,
            bits_per_key,
        }
    }

    /// Add a key to the filter being built.
    pub fn add_key(&mut self, key: Bytes) {
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Finalize and return the bloom filter.
    pub fn build(&self) -> BloomFilter {
        BloomFilter::generate(self.num_hashes, self.bits_per_key, &self.keys)
    }
}
