//! Bounded pool of async workers.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub tasks_submitted: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub current_running: usize,
    pub max_concurrent: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    running: AtomicUsize,
    /// Submitted but not finished.
    pending: AtomicUsize,
    idle: Notify,
}

impl Counters {
    fn finish(&self, ok: bool) {
        if ok {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Runs submitted tasks on the tokio runtime, at most `max_concurrent` at a time.
///
/// Submission never blocks; tasks beyond the limit wait for a permit.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    counters: Arc<Counters>,
    started: Instant,
}

impl WorkerPool {
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            counters: Arc::new(Counters::default()),
            started: Instant::now(),
        }
    }

    /// Queue `task`. Its error, if any, is logged and counted.
    pub fn submit<F, E>(&self, label: String, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        let permits = self.permits.clone();
        let counters = self.counters.clone();
        let pool = self.name;

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(pool, task = %label, "worker pool closed; dropping task");
                counters.finish(false);
                return;
            };
            counters.running.fetch_add(1, Ordering::Relaxed);
            debug!(pool, task = %label, "task started");

            let result = task.await;

            counters.running.fetch_sub(1, Ordering::Relaxed);
            match &result {
                Ok(()) => debug!(pool, task = %label, "task finished"),
                Err(e) => error!(pool, task = %label, error = %e, "task failed"),
            }
            counters.finish(result.is_ok());
        })
    }

    /// Wait until every queued and running task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            if self.counters.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop handing out permits; waiting tasks are dropped.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            tasks_submitted: self.counters.submitted.load(Ordering::Relaxed),
            tasks_succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            tasks_failed: self.counters.failed.load(Ordering::Relaxed),
            current_running: self.counters.running.load(Ordering::Relaxed),
            max_concurrent: self.max_concurrent,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}
