//! Order-preserving fixed-width integer encodings.
//!
//! Integers are written big-endian with the sign bit of the most significant
//! byte flipped, so that comparing the encoded bytes lexicographically gives
//! the same answer as comparing the numbers:
//!
//! ```text
//!   -1  -> 7F FF FF FF
//!    0  -> 80 00 00 00
//!    1  -> 80 00 00 01
//! ```
//!
//! Every multi-byte integer in the on-disk formats goes through here.

use std::cmp::Ordering;

use crate::error::{Error, Result};

pub const I32_SIZE: usize = 4;
pub const I64_SIZE: usize = 8;

pub fn encode_i32(v: i32) -> [u8; I32_SIZE] {
    let mut buf = v.to_be_bytes();
    buf[0] ^= 0x80;
    buf
}

pub fn decode_i32(data: &[u8]) -> Result<i32> {
    let mut buf: [u8; I32_SIZE] = data
        .get(..I32_SIZE)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Corruption("buffer too short for i32".into()))?;
    buf[0] ^= 0x80;
    Ok(i32::from_be_bytes(buf))
}

pub fn encode_i64(v: i64) -> [u8; I64_SIZE] {
    let mut buf = v.to_be_bytes();
    buf[0] ^= 0x80;
    buf
}

pub fn decode_i64(data: &[u8]) -> Result<i64> {
    let mut buf: [u8; I64_SIZE] = data
        .get(..I64_SIZE)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Corruption("buffer too short for i64".into()))?;
    buf[0] ^= 0x80;
    Ok(i64::from_be_bytes(buf))
}

/// Lengths and counts are stored in the signed 32-bit encoding.
pub fn encode_u32(v: u32) -> [u8; I32_SIZE] {
    encode_i32(v as i32)
}

pub fn decode_u32(data: &[u8]) -> Result<u32> {
    decode_i32(data).map(|v| v as u32)
}

/// Offsets, sizes and sequence ids share the signed 64-bit encoding.
pub fn encode_u64(v: u64) -> [u8; I64_SIZE] {
    encode_i64(v as i64)
}

pub fn decode_u64(data: &[u8]) -> Result<u64> {
    decode_i64(data).map(|v| v as u64)
}

/// Lexicographic byte comparison where an absent string sorts before
/// every present one (including the empty string).
pub fn compare(lhs: Option<&[u8]>, rhs: Option<&[u8]>) -> Ordering {
    match (lhs, rhs) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => l.cmp(r),
    }
}

/// Sequential reader over an encoded buffer. Every read is bounds-checked
/// and reports truncation as corruption.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::Corruption(format!(
                "need {} bytes at offset {}, only {} left",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        decode_u32(self.bytes(I32_SIZE)?)
    }

    pub fn u64(&mut self) -> Result<u64> {
        decode_u64(self.bytes(I64_SIZE)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_order_matches_numeric_order() {
        let values = [i32::MIN, -1000, -1, 0, 1, 255, 256, i32::MAX];
        for pair in values.windows(2) {
            assert!(encode_i32(pair[0]) < encode_i32(pair[1]));
        }
        for v in values {
            assert_eq!(decode_i32(&encode_i32(v)).unwrap(), v);
        }
    }

    #[test]
    fn i64_order_matches_numeric_order() {
        let values = [i64::MIN, -1, 0, 1, 1 << 40, i64::MAX];
        for pair in values.windows(2) {
            assert!(encode_i64(pair[0]) < encode_i64(pair[1]));
        }
        for v in values {
            assert_eq!(decode_i64(&encode_i64(v)).unwrap(), v);
        }
    }

    #[test]
    fn zero_encodes_with_high_bit_set() {
        assert_eq!(encode_i32(0), [0x80, 0, 0, 0]);
        assert_eq!(encode_i32(-1), [0x7F, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn u64_survives_full_range() {
        for v in [0u64, 1, u64::MAX / 2, u64::MAX] {
            assert_eq!(decode_u64(&encode_u64(v)).unwrap(), v);
        }
    }

    #[test]
    fn decode_short_buffer_is_corruption() {
        assert!(matches!(decode_i32(&[0x80, 0]), Err(Error::Corruption(_))));
        assert!(matches!(decode_i64(&[0u8; 7]), Err(Error::Corruption(_))));
    }

    #[test]
    fn absent_sorts_first() {
        assert_eq!(compare(None, Some(b"")), Ordering::Less);
        assert_eq!(compare(Some(b""), None), Ordering::Greater);
        assert_eq!(compare(None, None), Ordering::Equal);
        assert_eq!(compare(Some(b"a"), Some(b"ab")), Ordering::Less);
        assert_eq!(compare(Some(b"b"), Some(b"ab")), Ordering::Greater);
        assert_eq!(compare(Some(&[0xFF]), Some(&[0x01])), Ordering::Greater);
    }

    #[test]
    fn decoder_reports_truncation() {
        let mut buf = encode_u32(7).to_vec();
        buf.push(9);
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.u32().unwrap(), 7);
        assert_eq!(dec.u8().unwrap(), 9);
        assert_eq!(dec.remaining(), 0);
        assert!(dec.u64().is_err());
    }
}
