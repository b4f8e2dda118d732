use bytes::Bytes;

use crate::sstable::{BlockMeta, DiskFile};
use crate::types::{Key, KeyValue};

/// Read predicate shared by point lookups, range scans and compaction.
///
/// - `key`: the single target of a point lookup. When set, blocks whose bloom
///   filter rules the key out are skipped entirely.
/// - `start`/`end`: key range, `end` exclusive. Unset means unbounded.
/// - `version`: MVCC ceiling. Unset means "latest"; the engine pins it to the
///   visible watermark when the scan is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueFilter {
    key: Option<Key>,
    start: Option<Key>,
    end: Option<Key>,
    version: Option<u64>,
}

impl KeyValueFilter {
    /// Unbounded range at the latest version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup of `key`: scans from `key` and enables bloom pruning.
    pub fn for_key(key: impl Into<Key>) -> Self {
        let key = key.into();
        KeyValueFilter {
            start: Some(key.clone()),
            key: Some(key),
            ..Self::default()
        }
    }

    /// Restrict to `[start, end)`. An empty bound means unbounded on that side.
    pub fn with_range(mut self, start: impl Into<Key>, end: impl Into<Key>) -> Self {
        let (start, end) = (start.into(), end.into());
        self.start = (!start.is_empty()).then_some(start);
        self.end = (!end.is_empty()).then_some(end);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Pin the version ceiling unless the caller already chose one.
    pub fn set_version_if_absent(&mut self, version: u64) {
        self.version.get_or_insert(version);
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    pub fn start(&self) -> Option<&Bytes> {
        self.start.as_ref()
    }

    pub fn end(&self) -> Option<&Bytes> {
        self.end.as_ref()
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// The ceiling iterators apply; unset reads everything.
    pub fn version_ceiling(&self) -> u64 {
        self.version.unwrap_or(u64::MAX)
    }

    pub fn is_visible(&self, kv: &KeyValue) -> bool {
        kv.sequence_id() <= self.version_ceiling()
    }

    /// The record to seek merged iterators to before scanning: the newest
    /// possible version of the start key, or nothing for an unbounded start.
    pub fn seek_target(&self) -> Option<KeyValue> {
        self.start
            .as_ref()
            .map(|start| KeyValue::delete(start.clone(), u64::MAX))
    }

    /// Blocks of `file` that may hold matching records. Without a target key
    /// this is the whole index; with one, blocks whose bloom filter excludes
    /// the key are dropped.
    pub fn filtered_block_metas(&self, file: &DiskFile) -> Vec<BlockMeta> {
        match &self.key {
            None => file.block_metas().to_vec(),
            Some(key) => file
                .block_metas()
                .iter()
                .filter(|meta| meta.bloom_filter().may_contain(key))
                .cloned()
                .collect(),
        }
    }
}
