//! The distributed adapter surface.
//!
//! The core never talks to a backend directly; it talks to a
//! [`DistributedAdapter`]. Backend implementations (Redis, etcd, a database)
//! live outside this workspace; [`crate::InMemoryAdapter`] ships for tests
//! and single-process runs.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stanchion_core::Result;
use std::sync::Arc;
use std::time::Duration;

/// Message delivery guarantee for pub/sub.
///
/// Exactly-once is defined at this interface only: the adapter owns the
/// algorithm that makes redelivery invisible to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A published message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub payload: Value,
}

/// Subscriber callback.
pub type SubscriptionHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Leadership view for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderStatus {
    pub is_leader: bool,
    pub leader_id: Option<String>,
}

/// One operation inside a transactional commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TxnOperation {
    Set { key: String, value: Value },
    Delete { key: String },
    Increment { key: String, by: i64 },
}

/// Backend surface consumed by the coordinator. All methods are fallible;
/// the coordinator layers retry with back-off on top.
#[async_trait]
pub trait DistributedAdapter: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    /// Attempts to take a lock; `true` when acquired.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn release_lock(&self, key: &str) -> Result<()>;
    /// Extends a held lock; `true` when the lock was still held.
    async fn extend_lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Sets `key` to `next` only when its current value equals `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Value>,
        next: Value,
    ) -> Result<bool>;
    /// Atomically adds `by`; returns the new value.
    async fn increment(&self, key: &str, by: i64) -> Result<i64>;

    /// Attempts to become the leader; `true` when the campaign won.
    async fn campaign(&self, node_id: &str, ttl: Duration) -> Result<bool>;
    async fn resign(&self, node_id: &str) -> Result<()>;
    async fn leader_status(&self, node_id: &str) -> Result<LeaderStatus>;
    /// Refreshes leadership; `true` while still the leader.
    async fn heartbeat(&self, node_id: &str, ttl: Duration) -> Result<bool>;

    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        guarantee: DeliveryGuarantee,
    ) -> Result<()>;
    /// Returns a subscription id for [`DistributedAdapter::unsubscribe`].
    async fn subscribe(
        &self,
        topic: &str,
        guarantee: DeliveryGuarantee,
        handler: SubscriptionHandler,
    ) -> Result<String>;
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Stages a transaction; `true` when every operation can commit.
    async fn prepare(&self, txn_id: &str, operations: &[TxnOperation]) -> Result<bool>;
    async fn commit(&self, txn_id: &str) -> Result<()>;
    async fn rollback(&self, txn_id: &str) -> Result<()>;
}
