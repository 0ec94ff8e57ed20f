//! Attempt engine events.

use stanchion_core::events::OrchestrationEvent;
use std::time::{Duration, Instant};

/// Events emitted while driving an attempt loop.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An attempt is about to execute.
    AttemptStarted {
        name: String,
        timestamp: Instant,
        attempt: u32,
    },
    /// An attempt produced an ok outcome that survived the analyzer.
    AttemptSucceeded {
        name: String,
        timestamp: Instant,
        attempt: u32,
    },
    /// An attempt failed (transport error or simulated failure).
    AttemptFailed {
        name: String,
        timestamp: Instant,
        attempt: u32,
        retryable: bool,
    },
    /// The response analyzer rejected an ok response.
    ContentRejected {
        name: String,
        timestamp: Instant,
        attempt: u32,
    },
    /// A back-off sleep was scheduled before the next attempt.
    RetryScheduled {
        name: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
    },
    /// The circuit breaker refused the call, aborting the loop.
    CircuitShortCircuit {
        name: String,
        timestamp: Instant,
        attempt: u32,
    },
    /// A trial-mode Bernoulli draw was taken.
    TrialDraw {
        name: String,
        timestamp: Instant,
        attempt: u32,
        simulated_failure: bool,
    },
}

impl OrchestrationEvent for EngineEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::AttemptStarted { .. } => "attempt_started",
            EngineEvent::AttemptSucceeded { .. } => "attempt_succeeded",
            EngineEvent::AttemptFailed { .. } => "attempt_failed",
            EngineEvent::ContentRejected { .. } => "content_rejected",
            EngineEvent::RetryScheduled { .. } => "retry_scheduled",
            EngineEvent::CircuitShortCircuit { .. } => "circuit_short_circuit",
            EngineEvent::TrialDraw { .. } => "trial_draw",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            EngineEvent::AttemptStarted { timestamp, .. }
            | EngineEvent::AttemptSucceeded { timestamp, .. }
            | EngineEvent::AttemptFailed { timestamp, .. }
            | EngineEvent::ContentRejected { timestamp, .. }
            | EngineEvent::RetryScheduled { timestamp, .. }
            | EngineEvent::CircuitShortCircuit { timestamp, .. }
            | EngineEvent::TrialDraw { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            EngineEvent::AttemptStarted { name, .. }
            | EngineEvent::AttemptSucceeded { name, .. }
            | EngineEvent::AttemptFailed { name, .. }
            | EngineEvent::ContentRejected { name, .. }
            | EngineEvent::RetryScheduled { name, .. }
            | EngineEvent::CircuitShortCircuit { name, .. }
            | EngineEvent::TrialDraw { name, .. } => name,
        }
    }
}
