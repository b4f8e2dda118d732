use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::Result;
use crate::options::WalLevel;
use crate::types::KeyValue;

struct CursorState {
    pos: u64,
    closed: bool,
    /// Set once the tailer can no longer read the log back.
    failure: Option<String>,
}

/// How far the log file has been written out. The writer advances it after
/// every sync; the tailer waits on it.
pub struct LogCursor {
    state: Mutex<CursorState>,
    cond: Condvar,
}

impl LogCursor {
    pub fn new() -> Self {
        LogCursor {
            state: Mutex::new(CursorState {
                pos: 0,
                closed: false,
                failure: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.state.lock().pos
    }

    fn advance(&self, len: u64) -> u64 {
        let mut state = self.state.lock();
        state.pos += len;
        self.cond.notify_all();
        state.pos
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }

    /// Record that the synced log can no longer be read back. Writers check
    /// this before appending.
    pub fn fail(&self, reason: String) {
        self.state.lock().failure.get_or_insert(reason);
    }

    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// Block until the cursor moves past `from` or the log closes.
    /// Returns the new position, or None once closed with nothing new.
    pub fn wait_past(&self, from: u64) -> Option<u64> {
        let mut state = self.state.lock();
        while state.pos == from && !state.closed {
            self.cond.wait(&mut state);
        }
        (state.pos != from).then_some(state.pos)
    }
}

impl Default for LogCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends log records to the log file. Owned by the log-writer thread.
///
/// The file is truncated on open. Two layers of buffering:
///   BufWriter.flush()  → process buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
///
/// The buffer flushes by itself when a record would overflow it; the cursor
/// only moves on an explicit [`sync`](Self::sync).
pub struct LogWriter {
    writer: BufWriter<File>,
    level: WalLevel,
    /// Bytes appended since the cursor last moved.
    unsynced: u64,
    cursor: Arc<LogCursor>,
}

impl LogWriter {
    pub fn open(
        path: &Path,
        buffer_size: usize,
        level: WalLevel,
        cursor: Arc<LogCursor>,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(LogWriter {
            writer: BufWriter::with_capacity(buffer_size.max(1), file),
            level,
            unsynced: 0,
            cursor,
        })
    }

    pub fn append(&mut self, kv: &KeyValue) -> Result<()> {
        let encoded = kv.encode();
        self.writer.write_all(&encoded)?;
        self.unsynced += encoded.len() as u64;
        Ok(())
    }

    /// Push buffered records to the OS (and the device for FSYNC), then
    /// move the cursor over them.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.level == WalLevel::Fsync {
            self.writer.get_ref().sync_data()?;
        }
        if self.unsynced > 0 {
            let pos = self.cursor.advance(self.unsynced);
            debug!(bytes = self.unsynced, pos, "synced log");
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Final sync, then release the tailer.
    pub fn close(mut self) -> Result<()> {
        let result = self.sync();
        self.cursor.close();
        result
    }
}
