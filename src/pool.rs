use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named worker threads draining a shared job queue.
/// Runs MemStore flushes off the write path.
pub struct FlushPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FlushPool {
    pub fn new(name: &str, size: usize) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size.max(1));
        for i in 0..size.max(1) {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    // Ends once the sender is dropped and the queue is drained.
                    for job in rx.iter() {
                        job();
                    }
                })
                .map_err(|e| {
                    error!(error = %e, "failed to spawn flush worker");
                    e
                })?;
            workers.push(handle);
        }
        debug!(name, size = workers.len(), "flush pool started");
        Ok(FlushPool {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job. Fails with [`Error::Closed`] after shutdown.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(Error::Closed)?;
        sender.send(Box::new(job)).map_err(|_| Error::Closed)
    }

    /// Stop accepting jobs, let the workers finish what is queued, and join them.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = std::thread::current().id();
        for handle in workers {
            // A worker dropping the last handle to the pool cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("flush worker panicked");
            }
        }
    }
}

impl Drop for FlushPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn shutdown_drains_queued_jobs() {
        let pool = FlushPool::new("test-pool", 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert!(matches!(pool.submit(|| {}), Err(Error::Closed)));
    }
}
