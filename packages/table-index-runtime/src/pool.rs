//! Worker pool: threads that receive, process and acknowledge message batches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use table_index_core::SyncError;
use tokio::sync::watch;

use crate::progress::{MessageProgress, WorkerProgress};
use crate::queue::MessageQueue;
use crate::worker::TableWorker;
use crate::Result;

/// Counters shared by all pool threads.
#[derive(Debug, Default)]
struct PoolCounters {
    received: AtomicU64,
    removed: AtomicU64,
    retained: AtomicU64,
    queue_errors: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            received: self.received.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Messages received
    pub received: u64,
    /// Messages removed from the queue after processing
    pub removed: u64,
    /// Messages left for redelivery
    pub retained: u64,
    /// Failed queue calls
    pub queue_errors: u64,
}

/// Pool of synchronization threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Starts `worker.config().worker_count` threads polling `queue`.
    pub fn start(worker: Arc<TableWorker>, queue: Arc<dyn MessageQueue>) -> Result<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(PoolCounters::default());
        let worker_count = worker.config().worker_count.max(1);

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker = worker.clone();
            let queue = queue.clone();
            let shutdown_rx = shutdown_rx.clone();
            let counters = counters.clone();
            let handle = thread::Builder::new()
                .name(format!("index-sync-{}", worker_id))
                .spawn(move || run_worker(worker_id, worker, queue, shutdown_rx, counters))
                .map_err(|e| SyncError::Io(format!("Failed to spawn worker thread: {}", e)))?;
            handles.push(handle);
        }

        tracing::info!(workers = worker_count, "Worker pool started");
        Ok(Self {
            handles,
            shutdown,
            counters,
        })
    }

    /// Receiver that turns true once shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Signals shutdown and waits for every thread to finish its batch.
    pub fn shutdown(self) -> PoolStats {
        let Self {
            handles,
            shutdown,
            counters,
        } = self;
        shutdown.send_replace(true);
        for handle in &handles {
            handle.thread().unpark();
        }
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }

        let stats = counters.snapshot();
        tracing::info!(
            received = stats.received,
            removed = stats.removed,
            retained = stats.retained,
            "Worker pool stopped"
        );
        stats
    }
}

fn run_worker(
    worker_id: usize,
    worker: Arc<TableWorker>,
    queue: Arc<dyn MessageQueue>,
    shutdown: watch::Receiver<bool>,
    counters: Arc<PoolCounters>,
) {
    let config = worker.config().clone();
    let visibility = config.visibility_timeout();
    tracing::debug!(worker_id, "Worker started");

    while !*shutdown.borrow() {
        let messages = match queue.receive(config.message_batch_size, visibility) {
            Ok(messages) => messages,
            Err(e) => {
                counters.queue_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker_id, "Failed to receive messages: {}", e);
                thread::park_timeout(config.poll_interval());
                continue;
            }
        };
        if messages.is_empty() {
            thread::park_timeout(config.poll_interval());
            continue;
        }
        counters
            .received
            .fetch_add(messages.len() as u64, Ordering::Relaxed);

        let processed = worker.process_batch(&messages, |message| {
            Box::new(MessageProgress::new(
                queue.clone(),
                message.receipt_handle.clone(),
                visibility,
                shutdown.clone(),
            )) as Box<dyn WorkerProgress>
        });

        let retained = (messages.len() - processed.len()) as u64;
        counters.retained.fetch_add(retained, Ordering::Relaxed);
        match queue.delete(&processed) {
            Ok(removed) => {
                counters
                    .removed
                    .fetch_add(removed as u64, Ordering::Relaxed);
            }
            Err(e) => {
                counters.queue_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker_id, "Failed to delete processed messages: {}", e);
            }
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}
