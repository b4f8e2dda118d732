use crate::codec::{self, Decoder, I32_SIZE, I64_SIZE};
use crate::error::{Error, Result};

/// Magic number identifying a disk file.
pub const DISK_FILE_MAGIC: u64 = 0x1998_0825_DEAD_10CC;

/// The trailer sits at the end of a disk file.
/// It tells the reader where to find the block index and lets it check that
/// the file is complete.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ File size (8B)                       │
/// │ Block count (4B)                     │
/// │ Block index offset (8B)              │
/// │ Block index size (8B)                │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub file_size: u64,
    pub block_count: u32,
    pub index_offset: u64,
    pub index_size: u64,
    pub magic: u64,
}

impl Trailer {
    /// Size of the trailer in bytes (fixed).
    pub const SIZE: usize = I64_SIZE + I32_SIZE + I64_SIZE + I64_SIZE + I64_SIZE; // 36 bytes

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&codec::encode_u64(self.file_size));
        buf.extend_from_slice(&codec::encode_u32(self.block_count));
        buf.extend_from_slice(&codec::encode_u64(self.index_offset));
        buf.extend_from_slice(&codec::encode_u64(self.index_size));
        buf.extend_from_slice(&codec::encode_u64(self.magic));
        buf
    }

    /// Decode a trailer and check its magic.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("trailer too short".into()));
        }
        let mut dec = Decoder::new(data);
        let trailer = Trailer {
            file_size: dec.u64()?,
            block_count: dec.u32()?,
            index_offset: dec.u64()?,
            index_size: dec.u64()?,
            magic: dec.u64()?,
        };

        if trailer.magic != DISK_FILE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                DISK_FILE_MAGIC, trailer.magic
            )));
        }
        Ok(trailer)
    }
}
