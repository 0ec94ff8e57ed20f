//! Attempt engine and gateway executor.
//!
//! The attempt engine ([`AttemptEngine`], [`run_attempts`]) drives a retry
//! loop around an opaque callable with response/error analyzers, trial-mode
//! fault injection, jitter, and a hook pipeline, applied uniformly to
//! outbound requests and in-process functions. The gateway ([`Gateway`])
//! batches items through that loop under shared circuit-breaker, rate-limit,
//! and concurrency gates, with sequential, concurrent, stop-on-first-error,
//! and racing dispatch modes.
//!
//! # Example
//!
//! ```
//! use stanchion_engine::{AttemptConfig, AttemptEngine, HookEnv, RetryStrategy};
//! use stanchion_core::{MockReply, MockTransport, RequestSpec, Transport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let transport = Arc::new(MockTransport::script([
//!     MockReply::status(500),
//!     MockReply::ok_json(serde_json::json!({"status": "success"})),
//! ]));
//! let engine = AttemptEngine::new(transport as Arc<dyn Transport>);
//!
//! let config = AttemptConfig::builder()
//!     .attempts(3)
//!     .wait(Duration::from_millis(100))
//!     .retry_strategy(RetryStrategy::Exponential)
//!     .return_result(true)
//!     .build();
//!
//! let report = engine
//!     .execute_request(
//!         &RequestSpec::get("api.example.com", "/thing"),
//!         &config,
//!         &HookEnv::default(),
//!     )
//!     .await;
//! assert!(report.success);
//! # }
//! ```

mod backoff;
mod config;
mod engine;
mod events;
mod gateway;
mod item;

pub use backoff::{compute_delay, RetryStrategy};
pub use config::{
    final_error_analyzer, response_analyzer, sync_response_analyzer, AttemptConfig,
    AttemptConfigBuilder, AttemptOverrides, FinalErrorAnalyzer, PreExecutionConfig,
    ResponseAnalyzer, TrialModeConfig,
};
pub use engine::{
    run_attempts, AttemptEngine, AttemptReport, CallOutput, DoOnce, EngineMetrics, HookEnv,
};
pub use events::EngineEvent;
pub use gateway::{
    summarize, BatchSummary, Gateway, GatewayConfig, GatewayConfigBuilder, ItemKind, ItemReport,
    RACE_CANCELLED,
};
pub use item::{ExecutionItem, FunctionItem, ItemFn};
