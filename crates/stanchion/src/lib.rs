//! Resilient execution orchestrator.
//!
//! Stanchion wraps unreliable units of work (outbound requests and
//! in-process functions) with uniform recovery, coordination, and metrics,
//! and composes them into batches, workflows, branch trees, DAG graphs, and
//! scheduled jobs. Each subsystem is available as an individual crate and
//! as a feature of this meta-crate.
//!
//! # Quick start
//!
//! ```toml
//! [dependencies]
//! stanchion = { version = "0.1", features = ["workflow", "scheduler"] }
//! ```
//!
//! ```no_run
//! use stanchion::core::{MockTransport, RequestSpec, Transport};
//! use stanchion::engine::{AttemptConfig, AttemptEngine, HookEnv, RetryStrategy};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let transport = Arc::new(MockTransport::always_ok(serde_json::json!({"ok": true})));
//! let engine = AttemptEngine::new(transport as Arc<dyn Transport>);
//!
//! let config = AttemptConfig::builder()
//!     .attempts(5)
//!     .wait(Duration::from_millis(100))
//!     .retry_strategy(RetryStrategy::Exponential)
//!     .jitter(0.2)
//!     .return_result(true)
//!     .build();
//!
//! let report = engine
//!     .execute_request(
//!         &RequestSpec::get("api.example.com", "/health"),
//!         &config,
//!         &HookEnv::default(),
//!     )
//!     .await;
//! assert!(report.success);
//! # }
//! ```
//!
//! # Subsystems
//!
//! - **Engine** (`engine`): the attempt loop with response/error analyzers,
//!   trial-mode fault injection, jitter, and the hook pipeline, plus the
//!   gateway executor's sequential/concurrent/racing batch modes.
//! - **Resilience primitives** (`circuitbreaker`, `ratelimiter`,
//!   `bulkhead`, `cache`): shareable gates applied around any execution.
//! - **Workflow** (`workflow`): phase execution with configuration
//!   layering, non-linear phase decisions, branch walking, and DAG graphs.
//! - **Buffer** (`buffer`): serialized shared state with transaction logs.
//! - **Scheduler** (`scheduler`): interval/cron/timestamp job dispatch with
//!   bounded parallelism and restorable state.
//! - **Distributed** (`distributed`): strictly opt-in coordination facade.

pub use stanchion_core as core;

#[cfg(feature = "buffer")]
pub use stanchion_buffer as buffer;
#[cfg(feature = "bulkhead")]
pub use stanchion_bulkhead as bulkhead;
#[cfg(feature = "cache")]
pub use stanchion_cache as cache;
#[cfg(feature = "circuitbreaker")]
pub use stanchion_circuitbreaker as circuitbreaker;
#[cfg(feature = "distributed")]
pub use stanchion_distributed as distributed;
#[cfg(feature = "engine")]
pub use stanchion_engine as engine;
#[cfg(feature = "ratelimiter")]
pub use stanchion_ratelimiter as ratelimiter;
#[cfg(feature = "scheduler")]
pub use stanchion_scheduler as scheduler;
#[cfg(feature = "workflow")]
pub use stanchion_workflow as workflow;

pub use stanchion_core::{Error, Result};
