// Block builder/reader tests
// Tests for block sizing, checksums and the versioned block cursor.

use std::sync::Arc;

use lsmkv::iterator::StorageIterator;
use lsmkv::sstable::block::{Block, BlockBuilder, BLOCK_OVERHEAD};
use lsmkv::types::KeyValue;
use lsmkv::Error;

fn kv(key: &str, value: &str, seq: u64) -> KeyValue {
    KeyValue::put(key.as_bytes().to_vec(), value.as_bytes().to_vec(), seq)
}

// =============================================================================
// Test 1: Build then decode gives back the same records in order
// =============================================================================
#[test]
fn build_and_decode() {
    let mut builder = BlockBuilder::new(64 * 1024);
    let kvs: Vec<KeyValue> = (0..100).map(|i| kv(&format!("key_{:03}", i), "v", 1)).collect();
    for kv in &kvs {
        assert!(builder.add(kv));
    }
    assert_eq!(builder.len(), 100);

    let sealed = builder.build().unwrap();
    assert_eq!(sealed.last_kv, kvs[99]);
    assert_eq!(sealed.data.len(), BLOCK_OVERHEAD + kvs.iter().map(|kv| kv.serialized_size()).sum::<usize>());

    let block = Block::decode(&sealed.data).unwrap();
    assert_eq!(block.kvs(), kvs.as_slice());
}

// =============================================================================
// Test 2: Block refuses entries once it would reach its size limit
// =============================================================================
#[test]
fn block_full_rejects_entry() {
    let first = kv("a", "xxxxxxxxxx", 1);
    let limit = BLOCK_OVERHEAD + first.serialized_size() * 2;
    let mut builder = BlockBuilder::new(limit);

    assert!(builder.add(&first));
    // Two records would land exactly on the limit, which counts as full.
    assert!(!builder.add(&kv("b", "xxxxxxxxxx", 1)));
    assert_eq!(builder.len(), 1);
}

// =============================================================================
// Test 3: The first entry is always accepted
// =============================================================================
#[test]
fn first_entry_always_fits() {
    let mut builder = BlockBuilder::new(1);
    assert!(builder.add(&kv("key", "value", 1)));
    assert!(!builder.is_empty());
}

// =============================================================================
// Test 4: Empty builder seals to nothing
// =============================================================================
#[test]
fn empty_builder_builds_none() {
    assert!(BlockBuilder::new(4096).build().is_none());
}

// =============================================================================
// Test 5: A flipped bit in the payload is caught by the checksum
// =============================================================================
#[test]
fn checksum_mismatch_is_corruption() {
    let mut builder = BlockBuilder::new(4096);
    builder.add(&kv("apple", "red", 1));
    builder.add(&kv("banana", "yellow", 2));
    let mut data = builder.build().unwrap().data;

    // Flip a byte inside the value of the first record
    data[4 + 4 + 4 + 5 + 1 + 8] ^= 0x01;
    assert!(matches!(Block::decode(&data), Err(Error::Corruption(_))));
}

// =============================================================================
// Test 6: Truncated block is corruption
// =============================================================================
#[test]
fn truncated_block_is_corruption() {
    let mut builder = BlockBuilder::new(4096);
    builder.add(&kv("apple", "red", 1));
    let data = builder.build().unwrap().data;
    assert!(Block::decode(&data[..data.len() - 2]).is_err());
    assert!(Block::decode(&data[..3]).is_err());
}

// =============================================================================
// Test 7: Bloom filter of the block knows its keys
// =============================================================================
#[test]
fn block_bloom_covers_keys() {
    let mut builder = BlockBuilder::new(4096);
    for i in 0..20 {
        builder.add(&kv(&format!("k{:02}", i), "v", 1));
    }
    let sealed = builder.build().unwrap();
    let bloom = lsmkv::bloom::BloomFilter::from_bytes(3, sealed.bloom);
    for i in 0..20 {
        assert!(bloom.may_contain(format!("k{:02}", i).as_bytes()));
    }
}

// =============================================================================
// Test 8: Cursor hides records above the version ceiling and seeks
// =============================================================================
#[test]
fn cursor_respects_version_and_seek() {
    let block = Arc::new(Block::new(vec![
        kv("a", "a3", 3),
        kv("a", "a1", 1),
        kv("b", "b5", 5),
        kv("c", "c2", 2),
        kv("d", "d9", 9),
    ]));

    let mut iter = block.iter(3);
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push(iter.kv().value().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![b"a3".to_vec(), b"a1".to_vec(), b"c2".to_vec()]);

    iter.seek(&KeyValue::delete(&b"b"[..], u64::MAX)).unwrap();
    assert_eq!(iter.kv().value(), b"c2");

    iter.seek(&KeyValue::delete(&b"a"[..], 2)).unwrap();
    assert_eq!(iter.kv().value(), b"a1");

    iter.seek(&KeyValue::delete(&b"e"[..], u64::MAX)).unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 9: Memory footprint counts decoded key and value bytes
// =============================================================================
#[test]
fn memory_size() {
    let block = Block::new(vec![kv("ab", "xyz", 1), kv("c", "", 2)]);
    // rawKeyLen (key + 9) + value
    assert_eq!(block.memory_size(), (2 + 9 + 3) + (1 + 9));
}
