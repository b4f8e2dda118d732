use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{BlockCache, BlockId};
use crate::error::{Error, Result};
use crate::filter::KeyValueFilter;
use crate::sstable::block::{Block, BLOCK_OVERHEAD};
use crate::sstable::iterator::DiskFileIterator;
use crate::sstable::meta::BlockMeta;
use crate::sstable::trailer::Trailer;

/// An opened, immutable disk file.
///
/// On open:
/// 1. Read the trailer (last 36 bytes), check magic and recorded file size
/// 2. Read and parse the block index into memory
/// 3. Check the blocks tile the data region in order, back to back
/// 4. Ready for iteration (blocks are read on demand, through the cache)
///
/// Every live iterator holds a reference; [`close`](Self::close) refuses to
/// run while any are outstanding.
pub struct DiskFile {
    id: u64,
    path: PathBuf,
    /// Shared handle for block reads; seek + read must not interleave.
    file: Mutex<File>,
    trailer: Trailer,
    metas: Vec<BlockMeta>,
    refs: AtomicUsize,
    cache: Option<Arc<BlockCache>>,
}

impl DiskFile {
    pub fn open(id: u64, path: &Path, cache: Option<Arc<BlockCache>>) -> Result<Arc<Self>> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Trailer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{:?}: {} bytes is too short to hold a trailer",
                path, file_size
            )));
        }

        file.seek(SeekFrom::Start(file_size - Trailer::SIZE as u64))?;
        let mut buf = vec![0u8; Trailer::SIZE];
        file.read_exact(&mut buf)?;
        let trailer = Trailer::decode(&buf)?;

        if trailer.file_size != file_size {
            return Err(Error::Corruption(format!(
                "{:?}: trailer records {} bytes, file has {}",
                path, trailer.file_size, file_size
            )));
        }
        let index_end = trailer
            .index_offset
            .checked_add(trailer.index_size)
            .and_then(|end| end.checked_add(Trailer::SIZE as u64));
        if index_end != Some(file_size) {
            return Err(Error::Corruption(format!(
                "{:?}: index at {}+{} does not end at the trailer",
                path, trailer.index_offset, trailer.index_size
            )));
        }

        file.seek(SeekFrom::Start(trailer.index_offset))?;
        let mut index = vec![0u8; trailer.index_size as usize];
        file.read_exact(&mut index)?;
        let metas = BlockMeta::decode_index(&index)?;

        if metas.len() != trailer.block_count as usize {
            return Err(Error::Corruption(format!(
                "{:?}: trailer records {} blocks, index has {}",
                path,
                trailer.block_count,
                metas.len()
            )));
        }
        check_block_layout(path, &metas, trailer.index_offset)?;

        debug!(id, path = ?path, blocks = metas.len(), "opened disk file");
        Ok(Arc::new(DiskFile {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            trailer,
            metas,
            refs: AtomicUsize::new(0),
            cache,
        }))
    }

    /// Read and decode the block described by `meta`, bypassing the cache.
    /// A checksum mismatch is returned as corruption.
    pub fn create_reader(&self, meta: &BlockMeta) -> Result<Block> {
        let mut buf = vec![0u8; meta.size as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(meta.offset))?;
            file.read_exact(&mut buf)?;
        }
        Block::decode(&buf)
    }

    /// The decoded block for `meta`, served from the cache when there is one.
    pub fn load_block(&self, meta: &BlockMeta) -> Result<Arc<Block>> {
        match &self.cache {
            Some(cache) => cache.get_or_load(BlockId::new(self.id, meta.offset), || {
                self.create_reader(meta)
            }),
            None => self.create_reader(meta).map(Arc::new),
        }
    }

    /// A filtered iterator over this file. The file stays referenced until
    /// the iterator is dropped.
    pub fn iter(self: &Arc<Self>, filter: &KeyValueFilter) -> Result<DiskFileIterator> {
        DiskFileIterator::new(Arc::clone(self), filter)
    }

    /// Highest sequence id stored in this file. Reads every block.
    pub fn max_sequence_id(&self) -> Result<u64> {
        let mut max = 0;
        for meta in &self.metas {
            let block = self.create_reader(meta)?;
            if let Some(seq) = block.kvs().iter().map(|kv| kv.sequence_id()).max() {
                max = max.max(seq);
            }
        }
        Ok(max)
    }

    /// Check the file is no longer referenced. The handle itself is released
    /// when the last `Arc` goes away.
    pub fn close(&self) -> Result<()> {
        let refs = self.ref_count();
        if refs != 0 {
            return Err(Error::FileInUse {
                path: self.path.clone(),
                refs,
            });
        }
        Ok(())
    }

    pub(crate) fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn block_metas(&self) -> &[BlockMeta] {
        &self.metas
    }

    pub fn file_size(&self) -> u64 {
        self.trailer.file_size
    }
}

impl std::fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("blocks", &self.metas.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Blocks must start at 0 and follow each other with no gap up to the index.
/// Every block has room for at least its framing.
fn check_block_layout(path: &Path, metas: &[BlockMeta], index_offset: u64) -> Result<()> {
    let mut expected = 0u64;
    for (i, meta) in metas.iter().enumerate() {
        if meta.offset != expected {
            return Err(Error::Corruption(format!(
                "{:?}: block {} at offset {}, expected {}",
                path, i, meta.offset, expected
            )));
        }
        if meta.size < BLOCK_OVERHEAD as u64 {
            return Err(Error::Corruption(format!(
                "{:?}: block {} is {} bytes, below the {} byte framing",
                path, i, meta.size, BLOCK_OVERHEAD
            )));
        }
        expected = match meta.offset.checked_add(meta.size) {
            Some(end) if end <= index_offset => end,
            _ => {
                return Err(Error::Corruption(format!(
                    "{:?}: block {} at {}+{} runs past the index at {}",
                    path, i, meta.offset, meta.size, index_offset
                )))
            }
        };
    }
    if expected != index_offset {
        return Err(Error::Corruption(format!(
            "{:?}: blocks end at {}, index starts at {}",
            path, expected, index_offset
        )));
    }
    Ok(())
}
