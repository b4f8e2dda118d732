pub mod builder;
pub mod reader;

pub use builder::{BlockBuilder, SealedBlock};
pub use reader::{Block, BlockIterator};

use crate::codec::I32_SIZE;

/// Size of the leading kv_count field.
pub const KV_COUNT_SIZE: usize = I32_SIZE;
/// Size of the trailing CRC32 field.
pub const CHECKSUM_SIZE: usize = I32_SIZE;
/// Per-block framing around the serialized records.
pub const BLOCK_OVERHEAD: usize = KV_COUNT_SIZE + CHECKSUM_SIZE;
