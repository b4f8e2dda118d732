use std::sync::Arc;

use crate::error::Result;
use crate::filter::KeyValueFilter;
use crate::iterator::StorageIterator;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::meta::BlockMeta;
use crate::sstable::reader::DiskFile;
use crate::types::KeyValue;

/// Holds one reference on a disk file for as long as it lives.
struct FileRef(Arc<DiskFile>);

impl FileRef {
    fn acquire(file: Arc<DiskFile>) -> Self {
        file.acquire();
        FileRef(file)
    }
}

impl Drop for FileRef {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Iterates the visible records of one disk file, block by block.
///
/// Only the blocks the filter lets through are visited; each is loaded lazily
/// when the cursor reaches it.
pub struct DiskFileIterator {
    file: FileRef,
    metas: Vec<BlockMeta>,
    version: u64,
    /// Index into `metas` of the block under `block`.
    meta_idx: usize,
    block: BlockIterator,
}

impl DiskFileIterator {
    pub(crate) fn new(file: Arc<DiskFile>, filter: &KeyValueFilter) -> Result<Self> {
        let metas = filter.filtered_block_metas(&file);
        let mut iter = DiskFileIterator {
            file: FileRef::acquire(file),
            metas,
            version: filter.version_ceiling(),
            meta_idx: 0,
            block: exhausted(),
        };
        iter.load_from(0)?;
        Ok(iter)
    }

    /// Position on the first visible record of block `idx` or a later one.
    fn load_from(&mut self, mut idx: usize) -> Result<()> {
        while idx < self.metas.len() {
            let block = self.file.0.load_block(&self.metas[idx])?;
            let iter = block.iter(self.version);
            if iter.is_valid() {
                self.meta_idx = idx;
                self.block = iter;
                return Ok(());
            }
            idx += 1;
        }
        self.meta_idx = self.metas.len();
        self.block = exhausted();
        Ok(())
    }

    pub fn file(&self) -> &Arc<DiskFile> {
        &self.file.0
    }
}

fn exhausted() -> BlockIterator {
    Arc::new(Block::new(Vec::new())).iter(0)
}

impl StorageIterator for DiskFileIterator {
    fn kv(&self) -> &KeyValue {
        self.block.kv()
    }

    fn is_valid(&self) -> bool {
        self.block.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        self.block.next()?;
        if !self.block.is_valid() {
            self.load_from(self.meta_idx + 1)?;
        }
        Ok(())
    }

    /// The first block whose last record is >= target is the only one that
    /// can start the answer; later blocks are reached by `next`.
    fn seek(&mut self, target: &KeyValue) -> Result<()> {
        let idx = self.metas.partition_point(|meta| meta.last_kv < *target);
        if idx >= self.metas.len() {
            self.meta_idx = self.metas.len();
            self.block = exhausted();
            return Ok(());
        }

        let block = self.file.0.load_block(&self.metas[idx])?;
        let mut iter = block.iter(self.version);
        iter.seek(target)?;
        if iter.is_valid() {
            self.meta_idx = idx;
            self.block = iter;
            Ok(())
        } else {
            self.load_from(idx + 1)
        }
    }
}
