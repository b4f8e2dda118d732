use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use crate::codec::{self, Decoder, I32_SIZE, I64_SIZE};
use crate::error::{Error, Result};

/// Raw key bytes.
pub type Key = Bytes;

/// Raw value bytes.
pub type Value = Bytes;

pub const RAW_KEY_LEN_SIZE: usize = I32_SIZE;
pub const VAL_LEN_SIZE: usize = I32_SIZE;
pub const OP_SIZE: usize = 1;
pub const SEQ_ID_SIZE: usize = I64_SIZE;

/// Distinguishes puts from deletes.
/// A Delete writes a tombstone: the key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Put = 0,
    Delete = 1,
}

impl Op {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Op::Put),
            1 => Ok(Op::Delete),
            _ => Err(Error::Corruption(format!("unknown op code: {}", code))),
        }
    }
}

/// The atomic record of the engine: a key, a value, the operation and the
/// sequence id assigned by the write-ahead log.
///
/// Ordering: (key ASC, sequence_id DESC, op DESC). All versions of a key are
/// adjacent and the newest one comes first, which is what merging and MVCC
/// resolution rely on.
///
/// Serialized form:
/// ```text
/// ┌──────────────┬───────────┬─────┬────────┬───────────┬───────┐
/// │ rawKeyLen(4) │ valLen(4) │ key │ op(1)  │ seqId(8)  │ value │
/// └──────────────┴───────────┴─────┴────────┴───────────┴───────┘
/// rawKeyLen = key.len() + 1 + 8
/// ```
#[derive(Clone)]
pub struct KeyValue {
    key: Key,
    value: Value,
    op: Op,
    sequence_id: u64,
}

/// What an exhausted iterator hands out from `kv()`.
pub(crate) static EXHAUSTED: KeyValue = KeyValue {
    key: Bytes::new(),
    value: Bytes::new(),
    op: Op::Put,
    sequence_id: 0,
};

impl KeyValue {
    pub fn new(key: impl Into<Key>, value: impl Into<Value>, op: Op, sequence_id: u64) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
            op,
            sequence_id,
        }
    }

    pub fn put(key: impl Into<Key>, value: impl Into<Value>, sequence_id: u64) -> Self {
        Self::new(key, value, Op::Put, sequence_id)
    }

    pub fn delete(key: impl Into<Key>, sequence_id: u64) -> Self {
        Self::new(key, Bytes::new(), Op::Delete, sequence_id)
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn key_bytes(&self) -> &Key {
        &self.key
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn is_delete(&self) -> bool {
        self.op == Op::Delete
    }

    fn raw_key_len(&self) -> usize {
        self.key.len() + OP_SIZE + SEQ_ID_SIZE
    }

    /// Size of this record when serialized.
    pub fn serialized_size(&self) -> usize {
        RAW_KEY_LEN_SIZE + VAL_LEN_SIZE + self.raw_key_len() + self.value.len()
    }

    /// Decoded payload footprint, used for cache accounting.
    pub fn memory_size(&self) -> usize {
        self.raw_key_len() + self.value.len()
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&codec::encode_u32(self.raw_key_len() as u32));
        buf.extend_from_slice(&codec::encode_u32(self.value.len() as u32));
        buf.extend_from_slice(&self.key);
        buf.push(self.op.code());
        buf.extend_from_slice(&codec::encode_u64(self.sequence_id));
        buf.extend_from_slice(&self.value);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.encode_to(&mut buf);
        buf
    }

    /// Parse one record from the front of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        Self::decode_from(&mut dec)
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> Result<Self> {
        let raw_key_len = dec.u32()? as usize;
        let val_len = dec.u32()? as usize;
        let key_len = raw_key_len
            .checked_sub(OP_SIZE + SEQ_ID_SIZE)
            .ok_or_else(|| Error::Corruption(format!("raw key length {} too small", raw_key_len)))?;
        let key = Bytes::copy_from_slice(dec.bytes(key_len)?);
        let op = Op::from_code(dec.u8()?)?;
        let sequence_id = dec.u64()?;
        let value = Bytes::copy_from_slice(dec.bytes(val_len)?);
        Ok(KeyValue {
            key,
            value,
            op,
            sequence_id,
        })
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.sequence_id.cmp(&self.sequence_id))
            .then_with(|| other.op.code().cmp(&self.op.code()))
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Identity is (key, sequence_id, op); the value does not take part.
impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.sequence_id.hash(state);
        self.op.hash(state);
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key={:?}/op={:?}/sequenceId={}/value={:?}",
            self.key, self.op, self.sequence_id, self.value
        )
    }
}
