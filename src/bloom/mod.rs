pub mod builder;

use bytes::Bytes;
use xxhash_rust::xxh3::xxh3_64;

pub use builder::BloomFilterBuilder;

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any probed bit is 0 → key is DEFINITELY NOT in the set
/// - If all probed bits are 1 → key is PROBABLY in the set
///
/// One filter is built per on-disk block over that block's keys. Reads with a
/// target key skip blocks whose filter rules the key out.
///
/// Sizing: `bits_per_key * key_count` bits, rounded up to a whole byte and
/// never below 64 bits.
///
/// Probing: one 32-bit base hash `h`, then `k` positions derived by
/// repeatedly adding `rotr(h, 17)` (i.e. `(h >> 17) | (h << 15)`).
#[derive(Debug, Clone)]
pub struct BloomFilter {
    num_hashes: u32,
    bits: Bytes,
}

impl BloomFilter {
    /// Build the filter over `keys`.
    pub fn generate<K: AsRef<[u8]>>(num_hashes: u32, bits_per_key: usize, keys: &[K]) -> Self {
        let num_bits = (bits_per_key * keys.len()).div_ceil(8) * 8;
        let num_bits = num_bits.max(64);
        let mut bits = vec![0u8; num_bits / 8];

        for key in keys {
            let mut h = base_hash(key.as_ref());
            for _ in 0..num_hashes {
                let pos = h as usize % num_bits;
                bits[pos / 8] |= 1 << (pos % 8);
                h = h.wrapping_add(h.rotate_right(17));
            }
        }

        BloomFilter {
            num_hashes,
            bits: Bytes::from(bits),
        }
    }

    /// Wrap filter bytes read back from a block index.
    pub fn from_bytes(num_hashes: u32, bits: Bytes) -> Self {
        BloomFilter { num_hashes, bits }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    ///
    /// A filter without bits cannot rule anything out.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.bits.is_empty() {
            return true;
        }
        let num_bits = self.bits.len() * 8;
        let mut h = base_hash(key);
        for _ in 0..self.num_hashes {
            let pos = h as usize % num_bits;
            if self.bits[pos / 8] & (1 << (pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(h.rotate_right(17));
        }
        true
    }

    /// Serialized filter: the raw bit array.
    pub fn as_bytes(&self) -> &Bytes {
        &self.bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> usize {
        self.bits.len() * 8
    }
}

fn base_hash(key: &[u8]) -> u32 {
    xxh3_64(key) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basics() {
        let bf = BloomFilter::generate(3, 10, &[b"hello"]);
        assert!(bf.may_contain(b"hello"));
        assert_eq!(bf.num_bits(), 64);
    }

    #[test]
    fn size_rounds_up_to_bytes() {
        let keys: Vec<Vec<u8>> = (0..13u32).map(|i| i.to_be_bytes().to_vec()).collect();
        let bf = BloomFilter::generate(3, 10, &keys);
        // 130 bits -> 136
        assert_eq!(bf.num_bits(), 136);
    }
}
