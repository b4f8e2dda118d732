// KeyValue and byte codec tests
// Tests for record ordering, serialization and order-preserving integers.

use std::cmp::Ordering;

use lsmkv::codec;
use lsmkv::types::{KeyValue, Op};
use lsmkv::Error;

// =============================================================================
// Test 1: Encoded integers sort like the numbers they encode
// =============================================================================
#[test]
fn encoded_longs_sort_numerically() {
    let mut values: Vec<i64> = vec![0, -1, 1, i64::MIN, i64::MAX, -300, 300, 1 << 40, -(1 << 40)];
    let mut encoded: Vec<[u8; 8]> = values.iter().map(|v| codec::encode_i64(*v)).collect();

    values.sort();
    encoded.sort();

    let decoded: Vec<i64> = encoded.iter().map(|b| codec::decode_i64(b).unwrap()).collect();
    assert_eq!(decoded, values);
}

// =============================================================================
// Test 2: Zero encodes with the sign bit flipped
// =============================================================================
#[test]
fn zero_and_minus_one_encoding() {
    assert_eq!(codec::encode_i32(0), [0x80, 0, 0, 0]);
    assert_eq!(codec::encode_i32(-1), [0x7F, 0xFF, 0xFF, 0xFF]);
    assert_eq!(codec::encode_i64(1), [0x80, 0, 0, 0, 0, 0, 0, 1]);
}

// =============================================================================
// Test 3: Truncated integers are rejected
// =============================================================================
#[test]
fn truncated_integer_is_corruption() {
    assert!(matches!(codec::decode_i32(&[0x80, 0]), Err(Error::Corruption(_))));
    assert!(matches!(codec::decode_u64(&[0x80; 7]), Err(Error::Corruption(_))));
}

// =============================================================================
// Test 4: Absent byte strings sort before every present one
// =============================================================================
#[test]
fn compare_treats_absent_as_smallest() {
    assert_eq!(codec::compare(None, Some(&b""[..])), Ordering::Less);
    assert_eq!(codec::compare(Some(&b"a"[..]), None), Ordering::Greater);
    assert_eq!(codec::compare(None, None), Ordering::Equal);
    assert_eq!(codec::compare(Some(&b"ab"[..]), Some(&b"b"[..])), Ordering::Less);
    assert_eq!(codec::compare(Some(&b""[..]), Some(&b"a"[..])), Ordering::Less);
}

// =============================================================================
// Test 5: Key ascending, then sequence descending, then op descending
// =============================================================================
#[test]
fn key_value_total_order() {
    let a5 = KeyValue::put(&b"a"[..], &b"x"[..], 5);
    let a3 = KeyValue::put(&b"a"[..], &b"y"[..], 3);
    let a3_del = KeyValue::delete(&b"a"[..], 3);
    let b1 = KeyValue::put(&b"b"[..], &b"z"[..], 1);
    let empty = KeyValue::put(&b""[..], &b""[..], 0);

    let mut kvs = vec![b1.clone(), a3.clone(), empty.clone(), a5.clone(), a3_del.clone()];
    kvs.sort();
    assert_eq!(kvs, vec![empty, a5, a3_del, a3, b1]);
}

// =============================================================================
// Test 6: Equality ignores the value
// =============================================================================
#[test]
fn identity_ignores_value() {
    let a = KeyValue::put(&b"k"[..], &b"one"[..], 9);
    let b = KeyValue::put(&b"k"[..], &b"two"[..], 9);
    assert_eq!(a, b);
    assert_ne!(a, KeyValue::delete(&b"k"[..], 9));
}

// =============================================================================
// Test 7: Serialized layout matches the documented format
// =============================================================================
#[test]
fn serialized_layout() {
    let kv = KeyValue::put(&b"key"[..], &b"value"[..], 7);
    let bytes = kv.encode();

    assert_eq!(bytes.len(), kv.serialized_size());
    assert_eq!(bytes.len(), 4 + 4 + 3 + 1 + 8 + 5);
    // rawKeyLen = key + op + seq
    assert_eq!(codec::decode_u32(&bytes[0..4]).unwrap(), 12);
    assert_eq!(codec::decode_u32(&bytes[4..8]).unwrap(), 5);
    assert_eq!(&bytes[8..11], b"key");
    assert_eq!(bytes[11], Op::Put.code());
    assert_eq!(codec::decode_u64(&bytes[12..20]).unwrap(), 7);
    assert_eq!(&bytes[20..], b"value");
}

// =============================================================================
// Test 8: Decode reproduces every field
// =============================================================================
#[test]
fn decode_reproduces_fields() {
    for kv in [
        KeyValue::put(&b"alpha"[..], &b"1"[..], 1),
        KeyValue::delete(&b"beta"[..], u64::MAX >> 1),
        KeyValue::put(&b""[..], &b""[..], 0),
    ] {
        let decoded = KeyValue::decode(&kv.encode()).unwrap();
        assert_eq!(decoded.key(), kv.key());
        assert_eq!(decoded.value(), kv.value());
        assert_eq!(decoded.op(), kv.op());
        assert_eq!(decoded.sequence_id(), kv.sequence_id());
    }
}

// =============================================================================
// Test 9: Truncated or inconsistent buffers fail to decode
// =============================================================================
#[test]
fn decode_rejects_bad_buffers() {
    let bytes = KeyValue::put(&b"key"[..], &b"value"[..], 7).encode();
    for len in 0..bytes.len() {
        assert!(KeyValue::decode(&bytes[..len]).is_err(), "prefix of {} bytes decoded", len);
    }

    // rawKeyLen smaller than op + sequence id
    let mut bad = bytes.clone();
    bad[..4].copy_from_slice(&codec::encode_u32(3));
    assert!(matches!(KeyValue::decode(&bad), Err(Error::Corruption(_))));

    // Unknown op code
    let mut bad = bytes;
    bad[11] = 9;
    assert!(matches!(KeyValue::decode(&bad), Err(Error::Corruption(_))));
}
