//! Optional distributed coordination facade.
//!
//! A [`DistributedCoordinator`] wraps any [`DistributedAdapter`] with
//! namespace prefixing, exponential back-off retries (±25% jitter), an
//! optional batched-write mode flushed on a sync timer, and 2PC-style
//! transactional commits. The coordinator is strictly opt-in: nothing in
//! the core depends on it.
//!
//! Backend adapters (Redis, etcd, databases) live outside this workspace;
//! [`InMemoryAdapter`] ships here for tests and single-process runs.

mod adapter;
mod coordinator;
mod memory;

pub use adapter::{
    DeliveryGuarantee, DistributedAdapter, LeaderStatus, Message, SubscriptionHandler,
    TxnOperation,
};
pub use coordinator::{CoordinatorConfig, DistributedCoordinator};
pub use memory::InMemoryAdapter;
