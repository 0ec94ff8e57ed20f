//! Distributed coordinator: the namespaced, retrying facade over an
//! adapter. Strictly opt-in; the core runs identically without it.

use crate::adapter::{
    DeliveryGuarantee, DistributedAdapter, LeaderStatus, SubscriptionHandler, TxnOperation,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use stanchion_core::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Coordinator configuration.
#[derive(Clone)]
pub struct CoordinatorConfig {
    /// Prefix applied to every key and topic.
    pub namespace: String,
    /// This node's identity for locks and leadership.
    pub node_id: String,
    /// Retries per adapter call (beyond the first attempt).
    pub max_retries: u32,
    /// Base back-off delay; grows exponentially with ±25% jitter.
    pub base_delay: Duration,
    /// Queue writes and flush them on the sync timer instead of writing
    /// through.
    pub batched_state: bool,
    /// Flush period for batched state mode.
    pub sync_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            namespace: "stanchion".to_string(),
            node_id: "node-1".to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            batched_state: false,
            sync_interval: Duration::from_secs(1),
        }
    }
}

impl CoordinatorConfig {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn batched_state(mut self, enabled: bool) -> Self {
        self.batched_state = enabled;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }
}

/// Namespaced, retrying facade over a [`DistributedAdapter`].
pub struct DistributedCoordinator {
    adapter: Arc<dyn DistributedAdapter>,
    config: CoordinatorConfig,
    pending_writes: Arc<Mutex<Vec<(String, Value)>>>,
    sync_task: Mutex<Option<(CancellationToken, tokio::task::JoinHandle<()>)>>,
    txn_seq: AtomicU64,
    rng: Mutex<StdRng>,
}

impl DistributedCoordinator {
    pub fn new(adapter: Arc<dyn DistributedAdapter>, config: CoordinatorConfig) -> Self {
        Self {
            adapter,
            config,
            pending_writes: Arc::new(Mutex::new(Vec::new())),
            sync_task: Mutex::new(None),
            txn_seq: AtomicU64::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    fn key(&self, key: &str) -> String {
        if self.config.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.config.namespace, key)
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let raw = self
            .config
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.config.base_delay);
        let jitter = {
            let mut rng = self.rng.lock().unwrap();
            rng.gen_range(0.75..=1.25)
        };
        raw.mul_f64(jitter)
    }

    /// Runs an adapter call with exponential back-off retries.
    async fn with_retries<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "adapter call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Connects the adapter and, in batched mode, starts the sync timer.
    pub async fn connect(&self) -> Result<()> {
        self.with_retries(|| self.adapter.connect()).await?;
        if self.config.batched_state {
            let token = CancellationToken::new();
            let loop_token = token.clone();
            let interval = self.config.sync_interval;
            let adapter = Arc::clone(&self.adapter);
            let pending = Arc::clone(&self.pending_writes);
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = loop_token.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            let drained: Vec<(String, Value)> =
                                pending.lock().unwrap().drain(..).collect();
                            for (key, value) in drained {
                                if let Err(err) = adapter.set(&key, value).await {
                                    tracing::warn!(key, error = %err, "batched write failed");
                                }
                            }
                        }
                    }
                }
            });
            *self.sync_task.lock().unwrap() = Some((token, handle));
        }
        Ok(())
    }

    /// Flushes batched state and disconnects; cancels the sync timer.
    pub async fn disconnect(&self) -> Result<()> {
        self.flush().await?;
        if let Some((token, handle)) = self.sync_task.lock().unwrap().take() {
            token.cancel();
            handle.abort();
        }
        self.with_retries(|| self.adapter.disconnect()).await
    }

    /// Reads a namespaced key.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = self.key(key);
        self.with_retries(|| self.adapter.get(&key)).await
    }

    /// Writes a namespaced key. In batched mode the write queues until the
    /// next flush.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = self.key(key);
        if self.config.batched_state {
            self.pending_writes.lock().unwrap().push((key, value));
            return Ok(());
        }
        self.with_retries(|| self.adapter.set(&key, value.clone()))
            .await
    }

    /// Writes every queued batched write through to the adapter.
    pub async fn flush(&self) -> Result<()> {
        let drained: Vec<(String, Value)> =
            self.pending_writes.lock().unwrap().drain(..).collect();
        for (key, value) in drained {
            self.with_retries(|| self.adapter.set(&key, value.clone()))
                .await?;
        }
        Ok(())
    }

    /// Deletes a namespaced key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = self.key(key);
        self.with_retries(|| self.adapter.delete(&key)).await
    }

    /// Reads, transforms, and compare-and-swaps a key until the swap lands.
    pub async fn update<F>(&self, key: &str, transform: F) -> Result<Value>
    where
        F: Fn(Option<Value>) -> Value,
    {
        let namespaced = self.key(key);
        let mut guard = 0u32;
        loop {
            let current = self
                .with_retries(|| self.adapter.get(&namespaced))
                .await?;
            let next = transform(current.clone());
            let swapped = self
                .with_retries(|| {
                    self.adapter
                        .compare_and_swap(&namespaced, current.clone(), next.clone())
                })
                .await?;
            if swapped {
                return Ok(next);
            }
            guard += 1;
            if guard > 64 {
                return Err(Error::Validation(format!(
                    "update of '{key}' lost the swap race 64 times"
                )));
            }
        }
    }

    /// Atomically increments a namespaced counter.
    pub async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let key = self.key(key);
        self.with_retries(|| self.adapter.increment(&key, by)).await
    }

    /// Attempts to take a namespaced lock.
    pub async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let key = self.key(key);
        self.with_retries(|| self.adapter.acquire_lock(&key, ttl))
            .await
    }

    /// Releases a namespaced lock.
    pub async fn release_lock(&self, key: &str) -> Result<()> {
        let key = self.key(key);
        self.with_retries(|| self.adapter.release_lock(&key)).await
    }

    /// Extends a held namespaced lock.
    pub async fn extend_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let key = self.key(key);
        self.with_retries(|| self.adapter.extend_lock(&key, ttl))
            .await
    }

    /// Runs `work` under a lock, waiting with back-off for acquisition and
    /// releasing on the way out regardless of the outcome.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, ttl: Duration, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.acquire_lock(key, ttl).await? {
                break;
            }
            if attempt >= self.config.max_retries {
                return Err(Error::Timeout {
                    scope: format!("lock '{key}'"),
                    elapsed: ttl,
                });
            }
            tokio::time::sleep(self.backoff_delay(attempt)).await;
            attempt += 1;
        }

        let outcome = work().await;
        if let Err(err) = self.release_lock(key).await {
            tracing::warn!(key, error = %err, "lock release failed");
        }
        outcome
    }

    /// Campaigns for leadership under this node's id.
    pub async fn campaign(&self, ttl: Duration) -> Result<bool> {
        self.with_retries(|| self.adapter.campaign(&self.config.node_id, ttl))
            .await
    }

    /// Resigns leadership.
    pub async fn resign(&self) -> Result<()> {
        self.with_retries(|| self.adapter.resign(&self.config.node_id))
            .await
    }

    /// Current leadership view for this node.
    pub async fn leader_status(&self) -> Result<LeaderStatus> {
        self.with_retries(|| self.adapter.leader_status(&self.config.node_id))
            .await
    }

    /// Refreshes leadership.
    pub async fn heartbeat(&self, ttl: Duration) -> Result<bool> {
        self.with_retries(|| self.adapter.heartbeat(&self.config.node_id, ttl))
            .await
    }

    /// Publishes onto a namespaced topic.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Value,
        guarantee: DeliveryGuarantee,
    ) -> Result<()> {
        let topic = self.key(topic);
        self.with_retries(|| self.adapter.publish(&topic, payload.clone(), guarantee))
            .await
    }

    /// Subscribes to a namespaced topic.
    pub async fn subscribe(
        &self,
        topic: &str,
        guarantee: DeliveryGuarantee,
        handler: SubscriptionHandler,
    ) -> Result<String> {
        let topic = self.key(topic);
        self.with_retries(|| self.adapter.subscribe(&topic, guarantee, Arc::clone(&handler)))
            .await
    }

    /// Removes a subscription.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.with_retries(|| self.adapter.unsubscribe(subscription_id))
            .await
    }

    /// Commits a multi-operation transaction with prepare/commit/rollback
    /// semantics. Keys are namespaced before staging.
    pub async fn transaction(&self, operations: Vec<TxnOperation>) -> Result<()> {
        let operations: Vec<TxnOperation> = operations
            .into_iter()
            .map(|op| match op {
                TxnOperation::Set { key, value } => TxnOperation::Set {
                    key: self.key(&key),
                    value,
                },
                TxnOperation::Delete { key } => TxnOperation::Delete {
                    key: self.key(&key),
                },
                TxnOperation::Increment { key, by } => TxnOperation::Increment {
                    key: self.key(&key),
                    by,
                },
            })
            .collect();

        let txn_id = format!(
            "{}-txn-{}",
            self.config.node_id,
            self.txn_seq.fetch_add(1, Ordering::Relaxed) + 1
        );

        let prepared = self
            .with_retries(|| self.adapter.prepare(&txn_id, &operations))
            .await?;
        if !prepared {
            let _ = self.adapter.rollback(&txn_id).await;
            return Err(Error::Validation(format!(
                "transaction '{txn_id}' failed to prepare"
            )));
        }

        match self.with_retries(|| self.adapter.commit(&txn_id)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(rollback_err) = self.adapter.rollback(&txn_id).await {
                    tracing::warn!(txn = %txn_id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
