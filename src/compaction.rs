use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use crate::error::Result;
use crate::store::DiskStore;

/// Stop flag the compactor sleeps on, so `stop` wakes it immediately.
struct Signal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Sleep up to `timeout`. Returns true once stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cond.wait_for(&mut stopped, timeout);
        }
        *stopped
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}

/// Background thread that merges the live files once there are more than
/// `max_disk_files`, and archives retired files nobody reads any more.
pub struct Compactor {
    store: Arc<DiskStore>,
    signal: Arc<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Compactor {
    pub fn start(store: Arc<DiskStore>, interval: Duration) -> Result<Self> {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });

        let handle = {
            let store = Arc::clone(&store);
            let signal = Arc::clone(&signal);
            std::thread::Builder::new()
                .name("compactor".into())
                .spawn(move || run(&store, &signal, interval))
                .map_err(|e| {
                    error!(error = %e, "failed to spawn compactor thread");
                    e
                })?
        };

        Ok(Compactor {
            store,
            signal,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the loop, wait for it, then sweep once more so files retired by
    /// the last compaction are not left behind. Idempotent.
    pub fn stop(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        *self.signal.stopped.lock() = true;
        self.signal.cond.notify_all();
        if handle.join().is_err() {
            error!("compactor thread panicked");
        }
        if let Err(e) = self.store.sweep_retired() {
            error!(error = %e, "final sweep failed");
        }
        info!("compactor stopped");
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(store: &DiskStore, signal: &Signal, interval: Duration) {
    info!(interval = ?interval, max_files = store.max_disk_files(), "compactor started");
    while !signal.is_stopped() {
        let compacted = match store.maybe_compact() {
            Ok(compacted) => compacted,
            Err(e) => {
                error!(error = %e, "compaction failed");
                false
            }
        };
        if let Err(e) = store.sweep_retired() {
            error!(error = %e, "sweeping retired files failed");
        }
        // Keep going without a pause while there is a backlog.
        if !compacted && signal.wait(interval) {
            break;
        }
    }
}
