use std::ops::Bound;
use std::sync::Arc;

use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{KeyValue, EXHAUSTED};

/// Sorted map of records as the memstore keeps them. Values are unused; the
/// whole record is the map key.
pub type KvMap = SkipMap<KeyValue, ()>;

/// Cursor over one memstore map, hiding records above the version ceiling.
///
/// Holds the map by `Arc`, so a snapshot stays readable after the memstore
/// swapped it out. Each step re-enters the map just past the current record,
/// which tolerates concurrent inserts.
pub struct MapIterator {
    map: Arc<KvMap>,
    version: u64,
    current: Option<KeyValue>,
}

impl MapIterator {
    pub fn new(map: Arc<KvMap>, version: u64) -> Self {
        let current = first_visible(map.front(), version);
        MapIterator {
            map,
            version,
            current,
        }
    }
}

fn first_visible(mut entry: Option<Entry<'_, KeyValue, ()>>, version: u64) -> Option<KeyValue> {
    while let Some(e) = entry {
        if e.key().sequence_id() <= version {
            return Some(e.key().clone());
        }
        entry = e.next();
    }
    None
}

impl StorageIterator for MapIterator {
    fn kv(&self) -> &KeyValue {
        self.current.as_ref().unwrap_or(&EXHAUSTED)
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(current) = &self.current {
            let next = first_visible(self.map.lower_bound(Bound::Excluded(current)), self.version);
            self.current = next;
        }
        Ok(())
    }

    fn seek(&mut self, target: &KeyValue) -> Result<()> {
        self.current = first_visible(self.map.lower_bound(Bound::Included(target)), self.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(kvs: &[KeyValue]) -> Arc<KvMap> {
        let map = SkipMap::new();
        for kv in kvs {
            map.insert(kv.clone(), ());
        }
        Arc::new(map)
    }

    #[test]
    fn walks_in_order_and_hides_newer_versions() {
        let map = map_of(&[
            KeyValue::put(&b"a"[..], &b"1"[..], 1),
            KeyValue::put(&b"a"[..], &b"2"[..], 5),
            KeyValue::put(&b"b"[..], &b"3"[..], 2),
            KeyValue::put(&b"c"[..], &b"4"[..], 9),
        ]);
        let mut iter = MapIterator::new(map, 4);
        let mut seen = Vec::new();
        while iter.is_valid() {
            seen.push((iter.kv().key().to_vec(), iter.kv().sequence_id()));
            iter.next().unwrap();
        }
        assert_eq!(seen, vec![(b"a".to_vec(), 1), (b"b".to_vec(), 2)]);
    }

    #[test]
    fn seek_lands_on_first_visible_at_or_after_target() {
        let map = map_of(&[
            KeyValue::put(&b"a"[..], &b"1"[..], 1),
            KeyValue::put(&b"m"[..], &b"2"[..], 7),
            KeyValue::put(&b"m"[..], &b"3"[..], 2),
            KeyValue::put(&b"z"[..], &b"4"[..], 3),
        ]);
        let mut iter = MapIterator::new(map, 5);
        iter.seek(&KeyValue::delete(&b"m"[..], u64::MAX)).unwrap();
        assert_eq!(iter.kv().value(), b"3");
        iter.next().unwrap();
        assert_eq!(iter.kv().key(), b"z");
        iter.next().unwrap();
        assert!(!iter.is_valid());
    }
}
