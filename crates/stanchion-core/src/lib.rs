//! Core infrastructure for the stanchion execution orchestrator.
//!
//! This crate provides the shared vocabulary used across all stanchion
//! modules:
//! - Error model and retryability classification
//! - Request descriptors and attempt outcomes
//! - The transport seam (canonical wire shape + adapters)
//! - Event system for observability
//! - Hook surfaces and the persistence coordinator
//! - Metrics guardrail validation

pub mod error;
pub mod events;
pub mod guardrails;
pub mod hooks;
pub mod outcome;
pub mod request;
pub mod transport;

pub use error::{Error, Result};
pub use events::{EventListener, EventListeners, FnListener, OrchestrationEvent};
pub use guardrails::{Anomaly, GuardrailBound, GuardrailReport, MetricsGuardrails};
pub use hooks::{
    state_hook, sync_state_hook, ExecutionContext, HookArgs, PersistenceCoordinator, StateHook,
};
pub use outcome::{AttemptLog, AttemptOutcome};
pub use request::{HttpMethod, Protocol, RequestSpec};
pub use transport::{
    MockReply, MockTransport, TowerTransport, Transport, TransportRequest, TransportResponse,
};

/// Shallow-merges the keys of `patch` into `base`.
///
/// Both values are expected to be JSON objects; when either is not, `patch`
/// replaces `base` wholesale. Keys present in `patch` win.
pub fn merge_values(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base_map), Some(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        _ => *base = patch.clone(),
    }
}
