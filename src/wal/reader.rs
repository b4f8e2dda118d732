use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error};

use crate::codec::Decoder;
use crate::error::Result;
use crate::types::KeyValue;
use crate::wal::writer::LogCursor;
use crate::wal::{fail_pending, read_back_error, Pending};

/// Reads log records back from the log file.
///
/// Records are plain serialized key-values laid end to end, so a byte range
/// ending on a sync boundary always holds whole records.
pub struct LogReader {
    file: File,
}

impl LogReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(LogReader {
            file: File::open(path)?,
        })
    }

    /// Parse every record in `[offset, offset + len)`.
    pub fn read(&mut self, offset: u64, len: usize) -> Result<Vec<KeyValue>> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        parse_records(&buf)
    }
}

/// Split a run of serialized records. A truncated tail is corruption.
pub fn parse_records(buf: &[u8]) -> Result<Vec<KeyValue>> {
    let mut dec = Decoder::new(buf);
    let mut kvs = Vec::new();
    while dec.remaining() > 0 {
        kvs.push(KeyValue::decode_from(&mut dec)?);
    }
    Ok(kvs)
}

/// Body of the log-tailer thread: follow the cursor and republish every newly
/// synced record on the read queue. Returns once the log is closed and fully
/// read, or the read queue is gone.
///
/// A failed read marks the cursor failed and fails every waiting writer;
/// dropping the read queue sender then stops the consumer.
pub(crate) fn tail(
    mut reader: LogReader,
    cursor: Arc<LogCursor>,
    read_queue: Sender<KeyValue>,
    pending: Arc<Pending>,
) {
    let mut read_pos = 0u64;
    while let Some(pos) = cursor.wait_past(read_pos) {
        let kvs = match reader.read(read_pos, (pos - read_pos) as usize) {
            Ok(kvs) => kvs,
            Err(e) => {
                error!(from = read_pos, to = pos, error = %e, "failed to read back log");
                let reason = e.to_string();
                cursor.fail(reason.clone());
                let failed = fail_pending(&pending, || read_back_error(&reason));
                error!(failed, "log tailer stopped, failing waiting writers");
                return;
            }
        };
        debug!(records = kvs.len(), from = read_pos, to = pos, "tailed log");
        for kv in kvs {
            if read_queue.send(kv).is_err() {
                return;
            }
        }
        read_pos = pos;
    }
}
