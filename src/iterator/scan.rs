use bytes::Bytes;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::KeyValue;

/// Resolves a merged stream into one record per key.
///
/// Versions of a key arrive adjacent and newest first, and the sources have
/// already hidden everything above the version ceiling, so the first record
/// seen for a key is the answer. A delete there hides the key altogether.
///
/// Stops before `stop` (exclusive) when one is given. Forward-only.
pub struct ScanIterator {
    inner: Box<dyn StorageIterator>,
    stop: Option<Bytes>,
    done: bool,
}

impl ScanIterator {
    pub fn new(inner: Box<dyn StorageIterator>, stop: Option<Bytes>) -> Self {
        ScanIterator {
            inner,
            stop,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Option<KeyValue>> {
        while self.inner.is_valid() {
            let first = self.inner.kv().clone();
            if self.stop.as_ref().is_some_and(|stop| first.key() >= stop.as_ref()) {
                return Ok(None);
            }

            // Older versions of the same key are shadowed by `first`.
            self.inner.next()?;
            while self.inner.is_valid() && self.inner.kv().key() == first.key() {
                self.inner.next()?;
            }

            if !first.is_delete() {
                return Ok(Some(first));
            }
        }
        Ok(None)
    }
}

impl Iterator for ScanIterator {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(kv)) => Some(Ok(kv)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
