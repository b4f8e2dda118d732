use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sstable::block::{BlockBuilder, BLOCK_OVERHEAD};
use crate::sstable::meta::BlockMeta;
use crate::sstable::trailer::{Trailer, DISK_FILE_MAGIC};
use crate::sstable::BLOCK_SIZE_UP_LIMIT;
use crate::types::KeyValue;

/// Writes a disk file from a sorted stream of key-values.
///
/// Used during:
/// - MemStore flush (immutable snapshot → disk file)
/// - Compaction (merged live files → one disk file)
///
/// Build process:
/// 1. `append` entries in KeyValue order; a full block is written out and
///    indexed before the next one starts
/// 2. `append_index` seals the last block and writes the block index
/// 3. `append_trailer` writes the trailer
/// 4. `finish` flushes and fsyncs
pub struct DiskFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    block: BlockBuilder,
    /// Index entries: one per written block.
    metas: Vec<BlockMeta>,
    /// Current write position in the file.
    offset: u64,
    block_size: usize,
    index_offset: u64,
    index_size: u64,
    count: u64,
}

impl DiskFileWriter {
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_block_size(path, BLOCK_SIZE_UP_LIMIT)
    }

    /// A writer with a custom block size limit. Tests use small blocks to get
    /// multi-block files out of a handful of records.
    pub fn with_block_size(path: &Path, block_size: usize) -> Result<Self> {
        let file = File::create(path)?;
        Ok(DiskFileWriter {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            block: BlockBuilder::new(block_size),
            metas: Vec::new(),
            offset: 0,
            block_size,
            index_offset: 0,
            index_size: 0,
            count: 0,
        })
    }

    /// Add a key-value. MUST be called in KeyValue order.
    ///
    /// A record that cannot fit a block on its own is rejected rather than
    /// producing an oversized block.
    pub fn append(&mut self, kv: &KeyValue) -> Result<()> {
        if kv.serialized_size() + BLOCK_OVERHEAD > self.block_size {
            return Err(Error::InvalidArgument(format!(
                "key-value of {} bytes exceeds the block size limit of {} bytes",
                kv.serialized_size(),
                self.block_size
            )));
        }

        if !self.block.add(kv) {
            self.flush_block()?;
            // A fresh block always takes its first entry.
            self.block.add(kv);
        }
        self.count += 1;
        Ok(())
    }

    /// Write the current block out and record its index entry.
    fn flush_block(&mut self) -> Result<()> {
        let builder = std::mem::replace(&mut self.block, BlockBuilder::new(self.block_size));
        let Some(sealed) = builder.build() else {
            return Ok(());
        };

        let size = sealed.data.len() as u64;
        self.writer.write_all(&sealed.data)?;
        self.metas
            .push(BlockMeta::new(sealed.last_kv, self.offset, size, sealed.bloom));
        self.offset += size;
        Ok(())
    }

    /// Seal the last block and write the block index after the data blocks.
    pub fn append_index(&mut self) -> Result<()> {
        self.flush_block()?;

        let mut index = Vec::new();
        for meta in &self.metas {
            meta.encode_to(&mut index);
        }
        self.index_offset = self.offset;
        self.index_size = index.len() as u64;
        self.writer.write_all(&index)?;
        self.offset += self.index_size;
        Ok(())
    }

    /// Write the trailer. Call after [`append_index`](Self::append_index).
    pub fn append_trailer(&mut self) -> Result<()> {
        let trailer = Trailer {
            file_size: self.offset + Trailer::SIZE as u64,
            block_count: self.metas.len() as u32,
            index_offset: self.index_offset,
            index_size: self.index_size,
            magic: DISK_FILE_MAGIC,
        };
        self.writer.write_all(&trailer.encode())?;
        self.offset += Trailer::SIZE as u64;
        Ok(())
    }

    /// Flush the buffer and fsync. Returns the file size.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.offset)
    }

    /// Index, trailer and fsync in one go.
    pub fn complete(mut self) -> Result<u64> {
        self.append_index()?;
        self.append_trailer()?;
        self.finish()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}
