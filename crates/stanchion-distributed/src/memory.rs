//! In-memory adapter for tests and single-process runs.

use crate::adapter::{
    DeliveryGuarantee, DistributedAdapter, LeaderStatus, Message, SubscriptionHandler,
    TxnOperation,
};
use async_trait::async_trait;
use serde_json::Value;
use stanchion_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Lock {
    expires_at: Instant,
}

struct Subscription {
    id: String,
    topic: String,
    guarantee: DeliveryGuarantee,
    handler: SubscriptionHandler,
    seen: Mutex<HashSet<String>>,
}

struct Leadership {
    node_id: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Store {
    values: HashMap<String, Value>,
    locks: HashMap<String, Lock>,
    leader: Option<Leadership>,
    prepared: HashMap<String, Vec<TxnOperation>>,
}

/// A process-local [`DistributedAdapter`].
///
/// Exactly-once delivery is realized as at-least-once plus per-subscriber
/// message-id dedup; real backends own their own algorithm.
pub struct InMemoryAdapter {
    store: Mutex<Store>,
    subscriptions: Mutex<Vec<std::sync::Arc<Subscription>>>,
    seq: AtomicU64,
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            subscriptions: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn apply(store: &mut Store, operation: &TxnOperation) {
        match operation {
            TxnOperation::Set { key, value } => {
                store.values.insert(key.clone(), value.clone());
            }
            TxnOperation::Delete { key } => {
                store.values.remove(key);
            }
            TxnOperation::Increment { key, by } => {
                let current = store
                    .values
                    .get(key)
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                store.values.insert(key.clone(), Value::from(current + by));
            }
        }
    }
}

#[async_trait]
impl DistributedAdapter for InMemoryAdapter {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        match store.locks.get(key) {
            Some(lock) if lock.expires_at > now => Ok(false),
            _ => {
                store.locks.insert(
                    key.to_string(),
                    Lock {
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        self.store.lock().unwrap().locks.remove(key);
        Ok(())
    }

    async fn extend_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        match store.locks.get_mut(key) {
            Some(lock) if lock.expires_at > now => {
                lock.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.store.lock().unwrap().values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.store
            .lock()
            .unwrap()
            .values
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.lock().unwrap().values.remove(key).is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Value>,
        next: Value,
    ) -> Result<bool> {
        let mut store = self.store.lock().unwrap();
        let current = store.values.get(key);
        if current == expected.as_ref() {
            store.values.insert(key.to_string(), next);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut store = self.store.lock().unwrap();
        let current = store.values.get(key).and_then(Value::as_i64).unwrap_or(0);
        let next = current + by;
        store.values.insert(key.to_string(), Value::from(next));
        Ok(next)
    }

    async fn campaign(&self, node_id: &str, ttl: Duration) -> Result<bool> {
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        let vacant = store
            .leader
            .as_ref()
            .map(|leader| leader.expires_at <= now && leader.node_id != node_id)
            .unwrap_or(true);
        let already_leader = store
            .leader
            .as_ref()
            .map(|leader| leader.node_id == node_id)
            .unwrap_or(false);
        if vacant || already_leader {
            store.leader = Some(Leadership {
                node_id: node_id.to_string(),
                expires_at: now + ttl,
            });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn resign(&self, node_id: &str) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        if store
            .leader
            .as_ref()
            .map(|leader| leader.node_id == node_id)
            .unwrap_or(false)
        {
            store.leader = None;
        }
        Ok(())
    }

    async fn leader_status(&self, node_id: &str) -> Result<LeaderStatus> {
        let store = self.store.lock().unwrap();
        let now = Instant::now();
        let leader = store
            .leader
            .as_ref()
            .filter(|leader| leader.expires_at > now);
        Ok(LeaderStatus {
            is_leader: leader.map(|l| l.node_id == node_id).unwrap_or(false),
            leader_id: leader.map(|l| l.node_id.clone()),
        })
    }

    async fn heartbeat(&self, node_id: &str, ttl: Duration) -> Result<bool> {
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        match &mut store.leader {
            Some(leader) if leader.node_id == node_id && leader.expires_at > now => {
                leader.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        _guarantee: DeliveryGuarantee,
    ) -> Result<()> {
        let message_id = self.next_id("msg");
        let targets: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|sub| sub.topic == topic)
            .cloned()
            .collect();

        for subscription in targets {
            if subscription.guarantee == DeliveryGuarantee::ExactlyOnce {
                let mut seen = subscription.seen.lock().unwrap();
                if !seen.insert(message_id.clone()) {
                    continue;
                }
            }
            let message = Message {
                id: message_id.clone(),
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            (subscription.handler)(message).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        guarantee: DeliveryGuarantee,
        handler: SubscriptionHandler,
    ) -> Result<String> {
        let id = self.next_id("sub");
        self.subscriptions
            .lock()
            .unwrap()
            .push(std::sync::Arc::new(Subscription {
                id: id.clone(),
                topic: topic.to_string(),
                guarantee,
                handler,
                seen: Mutex::new(HashSet::new()),
            }));
        Ok(id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|sub| sub.id != subscription_id);
        Ok(())
    }

    async fn prepare(&self, txn_id: &str, operations: &[TxnOperation]) -> Result<bool> {
        let mut store = self.store.lock().unwrap();
        if store.prepared.contains_key(txn_id) {
            return Err(Error::Validation(format!(
                "transaction '{txn_id}' already prepared"
            )));
        }
        store
            .prepared
            .insert(txn_id.to_string(), operations.to_vec());
        Ok(true)
    }

    async fn commit(&self, txn_id: &str) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let operations = store.prepared.remove(txn_id).ok_or_else(|| {
            Error::Validation(format!("transaction '{txn_id}' was not prepared"))
        })?;
        for operation in &operations {
            Self::apply(&mut store, operation);
        }
        Ok(())
    }

    async fn rollback(&self, txn_id: &str) -> Result<()> {
        self.store.lock().unwrap().prepared.remove(txn_id);
        Ok(())
    }
}
