//! Deferred work scheduling.
//!
//! Nonessential work (revalidation, state sync, update checks) is queued
//! here and runs only after the worker has been quiet for the debounce
//! threshold. Tasks must be idempotent: the worker may be torn down before
//! or during execution and nothing here is persisted.

use crate::adapter::Adapter;
use crate::error::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct QueuedTask {
    desc: String,
    fut: BoxFuture<'static, Result<()>>,
}

/// Debounced queue of deferred async tasks.
pub struct IdleScheduler {
    adapter: Arc<dyn Adapter>,
    threshold_ms: u64,
    queue: Mutex<Vec<QueuedTask>>,
    epoch: AtomicU64,
    running: AtomicBool,
    drained: tokio::sync::Notify,
}

impl IdleScheduler {
    pub fn new(adapter: Arc<dyn Adapter>, threshold_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            threshold_ms,
            queue: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
            running: AtomicBool::new(false),
            drained: tokio::sync::Notify::new(),
        })
    }

    /// Queue a task for the next idle period.
    pub fn schedule<F>(&self, desc: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.queue.lock().unwrap().push(QueuedTask {
            desc: desc.into(),
            fut: Box::pin(fut),
        });
    }

    /// Start (or restart) the debounce timer. The host calls this at the end
    /// of each event; only the most recent trigger survives to execute.
    pub async fn trigger(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.adapter.timeout(self.threshold_ms).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            // A later trigger restarted the debounce.
            return;
        }
        self.execute().await;
    }

    /// Drain the queue in waves until it stays empty. Tasks scheduled while
    /// a wave runs are picked up by the next wave. Per-task errors are
    /// swallowed; idle work is best-effort by contract.
    async fn execute(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let batch: Vec<QueuedTask> = std::mem::take(&mut *self.queue.lock().unwrap());
            if batch.is_empty() {
                break;
            }
            let wave = batch.into_iter().map(|task| async move {
                if let Err(e) = task.fut.await {
                    debug!(task = %task.desc, error = %e, "idle task failed");
                }
            });
            futures::future::join_all(wave).await;
        }
        self.running.store(false, Ordering::SeqCst);
        self.drained.notify_waiters();
    }

    /// Resolve once the queue is empty and no wave is running.
    pub async fn empty(&self) {
        loop {
            let notified = self.drained.notified();
            if self.queue.lock().unwrap().is_empty() && !self.running.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Number of queued (not yet started) tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}
