use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{KeyValue, EXHAUSTED};

/// The current head of one source.
struct Head {
    kv: KeyValue,
    idx: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap; reverse so the smallest record sits on top.
// Identical records resolve to the lower source index.
impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .kv
            .cmp(&self.kv)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Scans across the memstore maps and all live disk files
/// - Compaction (merging disk files)
///
/// Nothing is deduplicated here: every version of a key comes out, newest
/// first, which is what [`ScanIterator`](crate::iterator::ScanIterator)
/// resolves and what compaction preserves.
pub struct MergeIterator {
    iters: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<Head>,
}

impl MergeIterator {
    pub fn new(iters: Vec<Box<dyn StorageIterator>>) -> Self {
        let mut merge = MergeIterator {
            iters,
            heap: BinaryHeap::new(),
        };
        merge.rebuild();
        merge
    }

    fn rebuild(&mut self) {
        self.heap = self
            .iters
            .iter()
            .enumerate()
            .filter(|(_, iter)| iter.is_valid())
            .map(|(idx, iter)| Head {
                kv: iter.kv().clone(),
                idx,
            })
            .collect();
    }

    /// Number of sources, exhausted or not.
    pub fn num_sources(&self) -> usize {
        self.iters.len()
    }
}

impl StorageIterator for MergeIterator {
    fn kv(&self) -> &KeyValue {
        self.heap.peek().map_or(&EXHAUSTED, |head| &head.kv)
    }

    fn is_valid(&self) -> bool {
        !self.heap.is_empty()
    }

    fn next(&mut self) -> Result<()> {
        let Some(head) = self.heap.pop() else {
            return Ok(());
        };
        let source = &mut self.iters[head.idx];
        source.next()?;
        if source.is_valid() {
            self.heap.push(Head {
                kv: source.kv().clone(),
                idx: head.idx,
            });
        }
        Ok(())
    }

    fn seek(&mut self, target: &KeyValue) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek(target)?;
        }
        self.rebuild();
        Ok(())
    }
}
