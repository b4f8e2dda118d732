use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::error::Result;
use crate::filter::KeyValueFilter;
use crate::iterator::{MergeIterator, StorageIterator};
use crate::memtable::Flusher;
use crate::sstable::{DiskFile, DiskFileWriter};

const DATA_FILE_PREFIX: &str = "data.";
const TMP_SUFFIX: &str = ".tmp";
const ARCHIVE_SUFFIX: &str = ".archive";

/// The id of a data file name (`data.<digits>`), None for anything else.
pub fn parse_file_id(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(DATA_FILE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn data_file_name(id: u64) -> String {
    format!("{}{:020}", DATA_FILE_PREFIX, id)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Removes a temporary file unless it was renamed into place.
struct TmpFile(PathBuf);

impl Drop for TmpFile {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = fs::remove_file(&self.0) {
                warn!(path = ?self.0, error = %e, "failed to remove temporary file");
            }
        }
    }
}

/// Rename a finished temporary file into place and open it. A file that
/// fails to open is removed again so a later reopen never trips over it.
fn install_file(
    tmp: &Path,
    path: &Path,
    id: u64,
    cache: &Arc<BlockCache>,
) -> Result<Arc<DiskFile>> {
    fs::rename(tmp, path)?;
    DiskFile::open(id, path, Some(Arc::clone(cache))).inspect_err(|e| {
        warn!(path = ?path, error = %e, "new data file does not open, removing it");
        if let Err(e) = fs::remove_file(path) {
            error!(path = ?path, error = %e, "failed to remove unopenable data file");
        }
    })
}

/// Clears the single-flight compaction flag when a compaction ends.
struct Compacting<'a>(&'a AtomicBool);

impl Drop for Compacting<'_> {
    fn drop(&mut self) {
        if self
            .0
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            error!("compaction flag was cleared by someone else");
        }
    }
}

/// Owns every disk file of the engine.
///
/// - `files`: the live set, read by scans.
/// - `retired`: inputs of finished compactions that may still be scanned.
///   They are archived by [`sweep_retired`](Self::sweep_retired) once no
///   iterator references them.
///
/// Lock order: `files` before `retired`.
pub struct DiskStore {
    data_dir: PathBuf,
    files: RwLock<Vec<Arc<DiskFile>>>,
    retired: RwLock<Vec<Arc<DiskFile>>>,
    cache: Arc<BlockCache>,
    max_disk_files: usize,
    /// Last file id handed out.
    file_id: AtomicU64,
    compacting: AtomicBool,
}

impl DiskStore {
    /// Open every data file under `data_dir`, dropping temporary files a
    /// crashed flush or compaction left behind.
    pub fn open(data_dir: &Path, max_disk_files: usize, cache_capacity: usize) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let cache = Arc::new(BlockCache::new(cache_capacity));

        let mut files = Vec::new();
        let mut max_id = 0;
        for entry in fs::read_dir(data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let path = entry.path();

            if name.starts_with(DATA_FILE_PREFIX) && name.ends_with(TMP_SUFFIX) {
                warn!(path = ?path, "removing leftover temporary file");
                fs::remove_file(&path)?;
                continue;
            }
            if let Some(id) = parse_file_id(name) {
                files.push(DiskFile::open(id, &path, Some(Arc::clone(&cache)))?);
                max_id = max_id.max(id);
            }
        }
        files.sort_by_key(|f| f.id());

        info!(dir = ?data_dir, files = files.len(), max_id, "disk store opened");
        Ok(DiskStore {
            data_dir: data_dir.to_path_buf(),
            files: RwLock::new(files),
            retired: RwLock::new(Vec::new()),
            cache,
            max_disk_files,
            file_id: AtomicU64::new(max_id),
            compacting: AtomicBool::new(false),
        })
    }

    fn next_file_id(&self) -> u64 {
        self.file_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn file_path(&self, id: u64) -> PathBuf {
        self.data_dir.join(data_file_name(id))
    }

    /// Drain `iter` into a new data file: write under a temporary name,
    /// rename into place, then open it. The temporary file never survives a
    /// failure.
    fn write_file(&self, iter: &mut dyn StorageIterator) -> Result<Arc<DiskFile>> {
        let id = self.next_file_id();
        let path = self.file_path(id);
        let tmp = TmpFile(with_suffix(&path, TMP_SUFFIX));

        let mut writer = DiskFileWriter::new(&tmp.0)?;
        while iter.is_valid() {
            writer.append(iter.kv())?;
            iter.next()?;
        }
        let count = writer.count();
        let size = writer.complete()?;
        let file = install_file(&tmp.0, &path, id, &self.cache)?;
        debug!(id, records = count, bytes = size, "wrote disk file");
        Ok(file)
    }

    /// Merge every live file into one. Returns false when another compaction
    /// is already running or there is nothing to merge.
    pub fn compact(&self) -> Result<bool> {
        if self
            .compacting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("compaction already running");
            return Ok(false);
        }
        let _guard = Compacting(&self.compacting);

        let inputs = self.files.read().clone();
        if inputs.is_empty() {
            return Ok(false);
        }

        let output = {
            let filter = KeyValueFilter::new();
            let mut sources: Vec<Box<dyn StorageIterator>> = Vec::with_capacity(inputs.len());
            for file in &inputs {
                sources.push(Box::new(file.iter(&filter)?));
            }
            let mut merged = MergeIterator::new(sources);
            self.write_file(&mut merged)?
        };

        let ids: Vec<u64> = inputs.iter().map(|f| f.id()).collect();
        self.compact_down(inputs, Arc::clone(&output));
        info!(inputs = ?ids, output = output.id(), "compacted disk files");
        Ok(true)
    }

    /// Compact when the live set has grown past the limit.
    pub fn maybe_compact(&self) -> Result<bool> {
        if self.num_files() > self.max_disk_files {
            self.compact()
        } else {
            Ok(false)
        }
    }

    /// Swap compaction inputs for their output and retire the inputs.
    fn compact_down(&self, inputs: Vec<Arc<DiskFile>>, output: Arc<DiskFile>) {
        let mut files = self.files.write();
        let mut retired = self.retired.write();
        files.retain(|f| !inputs.iter().any(|input| input.id() == f.id()));
        files.push(output);
        files.sort_by_key(|f| f.id());
        retired.extend(inputs);
    }

    /// Archive retired files nobody reads any more: rename to `.archive`
    /// and drop their cached blocks. Referenced files wait for a later sweep.
    /// Returns how many were archived.
    pub fn sweep_retired(&self) -> Result<usize> {
        let mut retired = self.retired.write();
        let mut kept = Vec::new();
        let mut archived = 0;
        for file in retired.drain(..) {
            if file.close().is_err() {
                kept.push(file);
                continue;
            }
            let archive = with_suffix(file.path(), ARCHIVE_SUFFIX);
            match fs::rename(file.path(), &archive) {
                Ok(()) => {
                    self.cache.evict_file(file.id());
                    info!(id = file.id(), path = ?archive, "archived disk file");
                    archived += 1;
                }
                Err(e) => {
                    error!(id = file.id(), error = %e, "failed to archive disk file");
                    kept.push(file);
                }
            }
        }
        *retired = kept;
        Ok(archived)
    }

    /// A merged view over every live file. The files stay referenced while
    /// the iterator lives.
    pub fn iter(&self, filter: &KeyValueFilter) -> Result<MergeIterator> {
        let files = self.files.read();
        let mut sources: Vec<Box<dyn StorageIterator>> = Vec::with_capacity(files.len());
        for file in files.iter() {
            sources.push(Box::new(file.iter(filter)?));
        }
        Ok(MergeIterator::new(sources))
    }

    /// Fails with [`FileInUse`](crate::Error::FileInUse) if any file, live or
    /// retired, is still referenced.
    pub fn close(&self) -> Result<()> {
        let files = self.files.read();
        let retired = self.retired.read();
        for file in files.iter().chain(retired.iter()) {
            file.close()?;
        }
        info!(live = files.len(), retired = retired.len(), "disk store closed");
        Ok(())
    }

    /// Highest sequence id stored in any live file.
    pub fn max_sequence_id(&self) -> Result<u64> {
        let mut max = 0;
        for file in self.files.read().iter() {
            max = max.max(file.max_sequence_id()?);
        }
        Ok(max)
    }

    pub fn live_files(&self) -> Vec<Arc<DiskFile>> {
        self.files.read().clone()
    }

    pub fn num_files(&self) -> usize {
        self.files.read().len()
    }

    pub fn num_retired(&self) -> usize {
        self.retired.read().len()
    }

    pub fn max_file_id(&self) -> u64 {
        self.file_id.load(Ordering::Acquire)
    }

    pub fn max_disk_files(&self) -> usize {
        self.max_disk_files
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Flusher for DiskStore {
    /// Write the snapshot to a new file and make it live.
    fn flush(&self, iter: &mut dyn StorageIterator) -> Result<()> {
        let file = self.write_file(iter)?;
        let id = file.id();
        let mut files = self.files.write();
        files.push(file);
        files.sort_by_key(|f| f.id());
        info!(id, live = files.len(), "flushed memstore to disk file");
        Ok(())
    }
}
