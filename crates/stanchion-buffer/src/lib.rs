//! Stable buffer: serialized single-writer shared state with transaction
//! logs.
//!
//! All mutation goes through [`StableBuffer::run`] (or
//! [`StableBuffer::run_async`]), which serializes mutators on a fair async
//! mutex so they apply in strict enqueue order. Every transaction records
//! queue wait, duration, success, and deep clones of the state before and
//! after (a `serde_json::Value` clone is the structured-clone equivalent).
//! Readers get a point-in-time snapshot and can never alias live state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use stanchion_core::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// One entry in the transaction log, serialized camelCase for hook
/// consumption.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub queued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub queue_wait_ms: u64,
    pub success: bool,
    pub state_before: Value,
    pub state_after: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counter snapshot for a stable buffer.
#[derive(Debug, Clone, Serialize)]
pub struct BufferMetrics {
    pub total_transactions: u64,
    pub failed_transactions: u64,
    pub total_wait_ms: u64,
    pub log_entries: usize,
}

/// Serialized mutable shared state.
pub struct StableBuffer {
    // tokio's Mutex queues waiters fairly, which is exactly the linear
    // transaction chain the buffer needs.
    state: Mutex<Map<String, Value>>,
    logs: StdMutex<Vec<TransactionRecord>>,
    seq: AtomicU64,
    failed: AtomicU64,
    total_wait_ms: AtomicU64,
    transaction_timeout: Option<Duration>,
}

impl Default for StableBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StableBuffer {
    /// An empty buffer with no transaction timeout.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Map::new()),
            logs: StdMutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
            transaction_timeout: None,
        }
    }

    /// A buffer seeded with initial state.
    pub fn with_state(initial: Map<String, Value>) -> Self {
        let buffer = Self::new();
        *buffer.state.try_lock().expect("fresh buffer is uncontended") = initial;
        buffer
    }

    /// Applies a per-transaction timeout to async mutators.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    /// Runs a synchronous mutator inside a transaction.
    pub async fn run<T>(
        &self,
        mutator: impl FnOnce(&mut Map<String, Value>) -> Result<T>,
    ) -> Result<T> {
        let queued_at = Utc::now();
        let wait_started = Instant::now();
        let mut state = self.state.lock().await;
        let queue_wait = wait_started.elapsed();
        let started_at = Utc::now();
        let state_before = Value::Object(state.clone());

        let work_started = Instant::now();
        let outcome = mutator(&mut state);
        let duration = work_started.elapsed();
        let state_after = Value::Object(state.clone());
        drop(state);

        self.record(
            queued_at,
            started_at,
            queue_wait,
            duration,
            state_before,
            state_after,
            outcome.as_ref().err().map(|e| e.to_string()),
        );
        outcome
    }

    /// Runs an async mutator inside a transaction.
    ///
    /// The mutator receives a deep clone of the state and returns the
    /// replacement object. The configured transaction timeout, when set,
    /// rejects the transaction and leaves the state untouched.
    pub async fn run_async<Fut>(&self, mutator: impl FnOnce(Value) -> Fut) -> Result<Value>
    where
        Fut: Future<Output = Result<Value>>,
    {
        let queued_at = Utc::now();
        let wait_started = Instant::now();
        let mut state = self.state.lock().await;
        let queue_wait = wait_started.elapsed();
        let started_at = Utc::now();
        let state_before = Value::Object(state.clone());

        let work_started = Instant::now();
        let fut = mutator(state_before.clone());
        let outcome = match self.transaction_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    scope: "transaction".to_string(),
                    elapsed: limit,
                }),
            },
            None => fut.await,
        };
        let duration = work_started.elapsed();

        let outcome = match outcome {
            Ok(next) => {
                let next_map = match next {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                };
                *state = next_map;
                Ok(Value::Object(state.clone()))
            }
            Err(err) => Err(err),
        };
        let state_after = Value::Object(state.clone());
        drop(state);

        self.record(
            queued_at,
            started_at,
            queue_wait,
            duration,
            state_before,
            state_after,
            outcome.as_ref().err().map(|e| e.to_string()),
        );
        outcome
    }

    /// Sets one key inside a transaction.
    pub async fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        self.run(move |state| {
            state.insert(key, value);
            Ok(())
        })
        .await
    }

    /// A deep-cloned point-in-time snapshot of the whole state.
    pub async fn read(&self) -> Value {
        Value::Object(self.state.lock().await.clone())
    }

    /// A deep-cloned value for one key.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().await.get(key).cloned()
    }

    /// Replaces the entire state, bypassing mutator logging. Used by
    /// restore paths.
    pub async fn replace(&self, state: Map<String, Value>) {
        *self.state.lock().await = state;
    }

    /// The recorded transaction log.
    pub fn transaction_logs(&self) -> Vec<TransactionRecord> {
        self.logs.lock().unwrap().clone()
    }

    /// The transaction log serialized for hook consumption.
    pub fn transaction_logs_json(&self) -> Vec<Value> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .map(|record| serde_json::to_value(record).unwrap_or(Value::Null))
            .collect()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            total_transactions: self.seq.load(Ordering::SeqCst),
            failed_transactions: self.failed.load(Ordering::SeqCst),
            total_wait_ms: self.total_wait_ms.load(Ordering::SeqCst),
            log_entries: self.logs.lock().unwrap().len(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        queued_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
        queue_wait: Duration,
        duration: Duration,
        state_before: Value,
        state_after: Value,
        error: Option<String>,
    ) {
        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = &error {
            self.failed.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(transaction = id, %error, "transaction failed");
        }
        self.total_wait_ms
            .fetch_add(queue_wait.as_millis() as u64, Ordering::SeqCst);

        let record = TransactionRecord {
            transaction_id: format!("tx-{id}"),
            queued_at,
            started_at,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            queue_wait_ms: queue_wait.as_millis() as u64,
            success: error.is_none(),
            state_before,
            state_after,
            error,
        };
        self.logs.lock().unwrap().push(record);
    }
}
