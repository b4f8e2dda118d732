//! Write-ahead log.
//!
//! Every write passes through a single log-writer thread, which assigns its
//! sequence id and, depending on [`WalLevel`], appends it to the log file
//! before handing it to the read queue. The engine's log consumer drains the
//! read queue into the memstore and then reports back through
//! [`Wal::notify_applied`], which releases the waiting writer.
//!
//! | Level  | Path to the read queue                                        |
//! |--------|---------------------------------------------------------------|
//! | Skip   | published at dequeue, never written                           |
//! | Async  | published at dequeue, appended to the buffer afterwards       |
//! | Sync   | appended and flushed, read back from the file by the tailer   |
//! | Fsync  | as Sync plus fsync before the tailer sees it                  |

pub mod reader;
pub mod writer;

pub use reader::{parse_records, LogReader};
pub use writer::{LogCursor, LogWriter};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::options::{Options, WalLevel};
use crate::types::{Key, KeyValue, Op, Value};

/// Callers waiting for their entry to be applied, by sequence id.
type Pending = Mutex<HashMap<u64, Sender<Result<u64>>>>;

/// Fail every waiting caller with `err()`. Returns how many there were.
fn fail_pending(pending: &Pending, err: impl Fn() -> Error) -> usize {
    let waiting: Vec<_> = pending.lock().drain().collect();
    let count = waiting.len();
    for (_, done) in waiting {
        let _ = done.send(Err(err()));
    }
    count
}

fn read_back_error(reason: &str) -> Error {
    Error::Corruption(format!("log can no longer be read back: {}", reason))
}

enum Command {
    Write {
        key: Key,
        value: Value,
        op: Op,
        done: Sender<Result<u64>>,
    },
    Sync {
        done: Sender<Result<()>>,
    },
}

pub struct Wal {
    sender: Mutex<Option<Sender<Command>>>,
    read_queue: Receiver<KeyValue>,
    pending: Arc<Pending>,
    sequence: Arc<AtomicU64>,
    cursor: Arc<LogCursor>,
    writer: Mutex<Option<JoinHandle<()>>>,
    tailer: Mutex<Option<JoinHandle<()>>>,
    level: WalLevel,
}

impl Wal {
    /// Truncate the log file and start the writer (and, for Sync/Fsync, the
    /// tailer). Sequence ids continue after `last_sequence`.
    pub fn open(options: &Options, last_sequence: u64) -> Result<Self> {
        std::fs::create_dir_all(&options.log_dir)?;
        let path = options.log_file();
        let level = options.wal_level;

        let cursor = Arc::new(LogCursor::new());
        let log = LogWriter::open(&path, options.wal_buffer_size, level, Arc::clone(&cursor))?;
        let reader = if level.tails_log() {
            Some(LogReader::open(&path)?)
        } else {
            None
        };

        let wal = Self::start(log, reader, cursor, level, last_sequence)?;
        info!(path = ?path, ?level, last_sequence, "write-ahead log opened");
        Ok(wal)
    }

    /// Spawn the writer, and the tailer when a reader is given.
    fn start(
        log: LogWriter,
        reader: Option<LogReader>,
        cursor: Arc<LogCursor>,
        level: WalLevel,
        last_sequence: u64,
    ) -> Result<Self> {
        let (tx, rx) = unbounded::<Command>();
        let (read_tx, read_rx) = unbounded::<KeyValue>();
        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        let sequence = Arc::new(AtomicU64::new(last_sequence));

        let tailer = match reader {
            Some(reader) => {
                let cursor = Arc::clone(&cursor);
                let read_tx = read_tx.clone();
                let pending = Arc::clone(&pending);
                Some(
                    std::thread::Builder::new()
                        .name("wal-tailer".into())
                        .spawn(move || reader::tail(reader, cursor, read_tx, pending))?,
                )
            }
            None => None,
        };

        let writer = {
            let pending = Arc::clone(&pending);
            let sequence = Arc::clone(&sequence);
            let cursor = Arc::clone(&cursor);
            // Sync/Fsync publish through the tailer only.
            let publish = (!level.tails_log()).then_some(read_tx);
            std::thread::Builder::new()
                .name("wal-writer".into())
                .spawn(move || run_writer(log, rx, publish, pending, sequence, cursor, level))?
        };

        Ok(Wal {
            sender: Mutex::new(Some(tx)),
            read_queue: read_rx,
            pending,
            sequence,
            cursor,
            writer: Mutex::new(Some(writer)),
            tailer: Mutex::new(tailer),
            level,
        })
    }

    /// Log a put. Returns its sequence id once the entry has been applied.
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<u64> {
        self.write(key.into(), value.into(), Op::Put)
    }

    /// Log a delete. Returns its sequence id once the entry has been applied.
    pub fn delete(&self, key: impl Into<Key>) -> Result<u64> {
        self.write(key.into(), Bytes::new(), Op::Delete)
    }

    fn write(&self, key: Key, value: Value, op: Op) -> Result<u64> {
        let (done, wait) = bounded(1);
        self.send(Command::Write {
            key,
            value,
            op,
            done,
        })?;
        wait.recv().map_err(|_| Error::Closed)?
    }

    /// Flush (and for Fsync, fsync) everything queued before this call.
    pub fn sync(&self) -> Result<()> {
        let (done, wait) = bounded(1);
        self.send(Command::Sync { done })?;
        wait.recv().map_err(|_| Error::Closed)?
    }

    fn send(&self, command: Command) -> Result<()> {
        let sender = self.sender.lock().clone().ok_or(Error::Closed)?;
        sender.send(command).map_err(|_| Error::Closed)
    }

    /// Entries ready to be applied, in sequence order. The queue disconnects
    /// once the log is closed and drained.
    pub fn read_queue(&self) -> Receiver<KeyValue> {
        self.read_queue.clone()
    }

    /// Release the caller waiting on `seq` with the outcome of applying it.
    pub fn notify_applied(&self, seq: u64, result: Result<()>) {
        if let Some(done) = self.pending.lock().remove(&seq) {
            let _ = done.send(result.map(|()| seq));
        }
    }

    /// Highest sequence id handed out so far.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Bytes synced to the log file so far.
    pub fn synced_bytes(&self) -> u64 {
        self.cursor.position()
    }

    pub fn level(&self) -> WalLevel {
        self.level
    }

    /// Stop accepting entries, let the writer drain the queue and close the
    /// file, then wait for the tailer to publish the rest. Idempotent.
    pub fn close(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                error!("wal writer panicked");
            }
        }
        if let Some(handle) = self.tailer.lock().take() {
            if handle.join().is_err() {
                error!("wal tailer panicked");
            }
        }
    }

    /// Fail whatever is still waiting. Called once nothing will apply it.
    pub(crate) fn abandon_pending(&self) {
        let count = fail_pending(&self.pending, || Error::Closed);
        if count > 0 {
            warn!(count, "abandoning unapplied log entries");
        }
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        self.close();
        self.abandon_pending();
    }
}

/// Body of the log-writer thread. Runs until every sender is gone and the
/// queue is drained.
fn run_writer(
    mut log: LogWriter,
    commands: Receiver<Command>,
    publish: Option<Sender<KeyValue>>,
    pending: Arc<Pending>,
    sequence: Arc<AtomicU64>,
    cursor: Arc<LogCursor>,
    level: WalLevel,
) {
    for command in commands.iter() {
        match command {
            Command::Write {
                key,
                value,
                op,
                done,
            } => {
                // Nothing appended now would ever be read back and applied.
                if let Some(reason) = cursor.failure() {
                    let _ = done.send(Err(read_back_error(&reason)));
                    continue;
                }
                let seq = sequence.fetch_add(1, Ordering::AcqRel) + 1;
                let kv = KeyValue::new(key, value, op, seq);
                pending.lock().insert(seq, done);

                let result = match level {
                    WalLevel::Skip => publish_entry(publish.as_ref(), kv),
                    WalLevel::Async => {
                        if let Err(e) = log.append(&kv) {
                            error!(seq, error = %e, "async log append failed");
                        }
                        publish_entry(publish.as_ref(), kv)
                    }
                    WalLevel::Sync | WalLevel::Fsync => log.append(&kv).and_then(|()| log.sync()),
                };

                let result = match cursor.failure() {
                    // The tailer may have drained the waiters before this
                    // entry was registered.
                    Some(reason) => result.and(Err(read_back_error(&reason))),
                    None => result,
                };
                if let Err(e) = result {
                    error!(seq, error = %e, "log write failed");
                    if let Some(done) = pending.lock().remove(&seq) {
                        let _ = done.send(Err(e));
                    }
                }
            }
            Command::Sync { done } => {
                let _ = done.send(log.sync());
            }
        }
    }

    if let Err(e) = log.close() {
        error!(error = %e, "failed to close log");
    }
}

fn publish_entry(publish: Option<&Sender<KeyValue>>, kv: KeyValue) -> Result<()> {
    match publish {
        Some(queue) => queue.send(kv).map_err(|_| Error::Closed),
        None => Ok(()),
    }
}
