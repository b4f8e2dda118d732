//! On-disk sorted files ("disk files").
//!
//! ```text
//! [Block]* [BlockIndex] [Trailer]
//! Block      := kv_count(4) { KeyValue }* checksum(4, CRC32 over KeyValue bytes)
//! BlockIndex := { BlockMeta }*
//! BlockMeta  := KeyValue(last kv of block) blockOffset(8) blockSize(8) bfLen(4) bloom(bfLen)
//! Trailer    := fileSize(8) blockCount(4) blockIndexOffset(8) blockIndexSize(8) magic(8)
//! ```
//!
//! All integers use the order-preserving encoding from [`crate::codec`].

pub mod block;
pub mod builder;
pub mod iterator;
pub mod meta;
pub mod reader;
pub mod trailer;

pub use builder::DiskFileWriter;
pub use iterator::DiskFileIterator;
pub use meta::BlockMeta;
pub use reader::DiskFile;
pub use trailer::{Trailer, DISK_FILE_MAGIC};

/// A block is sealed once adding the next record would reach this size.
pub const BLOCK_SIZE_UP_LIMIT: usize = 2 * 1024 * 1024;
pub const BLOOM_FILTER_HASH_COUNT: u32 = 3;
pub const BLOOM_FILTER_BITS_PER_KEY: usize = 10;
