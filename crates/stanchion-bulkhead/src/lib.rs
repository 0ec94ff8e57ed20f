//! Concurrency limiter: a semaphore with a FIFO waiter queue.
//!
//! At most `limit` executions run at once; excess callers queue in arrival
//! order on a fair semaphore. The slot is released through an RAII permit,
//! so a panicking or failing callable can never wedge it.

use serde::Serialize;
use stanchion_core::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Counter snapshot for a bulkhead.
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadMetrics {
    pub limit: usize,
    pub running: usize,
    pub queued: usize,
    pub peak_running: usize,
    pub total_completed: u64,
    pub total_rejected: u64,
}

/// Concurrency limiter with FIFO admission.
pub struct Bulkhead {
    limit: usize,
    semaphore: Arc<Semaphore>,
    /// Bound on queue wait; `None` waits indefinitely.
    max_wait: Option<Duration>,
    name: String,
    queued: AtomicUsize,
    peak_running: AtomicUsize,
    total_completed: AtomicU64,
    total_rejected: AtomicU64,
}

impl Bulkhead {
    /// Creates a limiter allowing `limit` concurrent executions.
    pub fn new(limit: usize) -> Self {
        Self::named("<unnamed>", limit)
    }

    /// Creates a named limiter (the name labels events and metrics).
    pub fn named(name: impl Into<String>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            max_wait: None,
            name: name.into(),
            queued: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            total_completed: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Bounds the wait for a slot; waiters that exceed it fail with a
    /// timeout error. Default is an unbounded wait.
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Runs `fut` once a slot is free. The slot is released when the future
    /// settles, whatever its outcome.
    pub async fn execute<T>(&self, fut: impl Future<Output = T>) -> Result<T> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let permit = match self.max_wait {
            Some(limit) => {
                match tokio::time::timeout(limit, Arc::clone(&self.semaphore).acquire_owned()).await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) | Err(_) => {
                        self.queued.fetch_sub(1, Ordering::SeqCst);
                        self.total_rejected.fetch_add(1, Ordering::SeqCst);
                        #[cfg(feature = "metrics")]
                        metrics::counter!("bulkhead_rejected_total", "bulkhead" => self.name.clone())
                            .increment(1);
                        #[cfg(feature = "tracing")]
                        tracing::debug!(bulkhead = %self.name, "timed out waiting for a slot");
                        return Err(Error::Timeout {
                            scope: "bulkhead queue".to_string(),
                            elapsed: limit,
                        });
                    }
                }
            }
            None => match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    return Err(Error::Cancelled("bulkhead was shut down".to_string()));
                }
            },
        };
        self.queued.fetch_sub(1, Ordering::SeqCst);

        let running = self.limit - self.semaphore.available_permits();
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        metrics::gauge!("bulkhead_running", "bulkhead" => self.name.clone()).set(running as f64);

        let out = fut.await;
        drop(permit);
        self.total_completed.fetch_add(1, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        metrics::counter!("bulkhead_completed_total", "bulkhead" => self.name.clone()).increment(1);
        Ok(out)
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            limit: self.limit,
            running: self.limit - self.semaphore.available_permits(),
            queued: self.queued.load(Ordering::SeqCst),
            peak_running: self.peak_running.load(Ordering::SeqCst),
            total_completed: self.total_completed.load(Ordering::SeqCst),
            total_rejected: self.total_rejected.load(Ordering::SeqCst),
        }
    }

    /// The configured concurrency limit.
    pub fn limit(&self) -> usize {
        self.limit
    }
}
