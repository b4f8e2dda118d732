pub mod merge;
pub mod scan;

pub use merge::MergeIterator;
pub use scan::ScanIterator;

use crate::error::Result;
use crate::types::KeyValue;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (memstore map, block, disk file, merged view)
/// implements this trait, in KeyValue order. This enables composability:
/// MergeIterator takes `Vec<Box<dyn StorageIterator>>` and merges them.
///
/// Sources apply their own version ceiling, so only visible records surface.
pub trait StorageIterator: Send {
    /// Returns the current record. Only meaningful when is_valid() is true.
    fn kv(&self) -> &KeyValue;

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry >= target.
    fn seek(&mut self, target: &KeyValue) -> Result<()>;
}
