//! Circuit breaker: a failure-ratio state machine gating calls.
//!
//! The breaker moves between three states:
//!
//! - `Closed`: calls flow; successes and failures are recorded. When at
//!   least `minimum_requests` calls have been observed and the failure
//!   percentage reaches `failure_threshold_pct`, the circuit opens.
//! - `Open`: calls are rejected until `recovery_timeout` has elapsed since
//!   opening, at which point the next caller is admitted as a probe and the
//!   circuit becomes half-open.
//! - `HalfOpen`: at most `half_open_max` probes are in flight. The first
//!   probe success closes the circuit; the first failure re-opens it.
//!
//! Instances are cheap to share: wrap one in an `Arc` and hand it to any
//! number of engines, gateways, or scheduler jobs.

mod config;
mod events;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use events::CircuitBreakerEvent;

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

/// The state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Point-in-time snapshot of breaker counters.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub failure_pct: f64,
    pub half_open_inflight: usize,
    /// Rejections since construction, across all open periods.
    pub total_rejected: u64,
    /// State transitions since construction.
    pub total_transitions: u64,
}

#[derive(Debug)]
struct Sample {
    at: Instant,
    is_failure: bool,
}

struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    successes: u64,
    failures: u64,
    samples: VecDeque<Sample>,
    half_open_inflight: usize,
    total_rejected: u64,
    total_transitions: u64,
}

/// Failure-ratio circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a breaker from its configuration; see
    /// [`CircuitBreakerConfig::builder`].
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                successes: 0,
                failures: 0,
                samples: VecDeque::new(),
                half_open_inflight: 0,
                total_rejected: 0,
                total_transitions: 0,
            }),
        }
    }

    /// A breaker with default thresholds, for tests and quick starts.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::builder().build_config())
    }

    /// Whether the engine should consult the breaker on every attempt
    /// rather than only the first.
    pub fn track_individual_attempts(&self) -> bool {
        self.config.track_individual_attempts
    }

    /// Asks whether a call may proceed right now. In the open state this
    /// also performs the open-to-half-open transition once the recovery
    /// timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                self.emit_permitted(&inner);
                true
            }
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_inflight = 1;
                    self.emit_permitted(&inner);
                    true
                } else {
                    self.reject(&mut inner)
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_max {
                    inner.half_open_inflight += 1;
                    self.emit_permitted(&inner);
                    true
                } else {
                    self.reject(&mut inner)
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.push_sample(&mut inner, false);
        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::SuccessRecorded {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                state: inner.state,
            });
        #[cfg(feature = "metrics")]
        metrics::counter!("circuitbreaker_calls_total", "circuitbreaker" => self.config.name.clone(), "outcome" => "success").increment(1);

        if inner.state == CircuitState::HalfOpen {
            // First probe success restores the circuit.
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Records a failed call, possibly tripping the circuit open.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.push_sample(&mut inner, true);
        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::FailureRecorded {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                state: inner.state,
            });
        #[cfg(feature = "metrics")]
        metrics::counter!("circuitbreaker_calls_total", "circuitbreaker" => self.config.name.clone(), "outcome" => "failure").increment(1);

        match inner.state {
            CircuitState::HalfOpen => {
                // A failed probe re-opens immediately.
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => self.evaluate(&mut inner),
            CircuitState::Open => {}
        }
    }

    /// Current state, performing no transitions.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.inner.lock().unwrap();
        self.trim_window(&mut inner);
        let (total, failures, successes) = self.window_counts(&inner);
        CircuitBreakerMetrics {
            state: inner.state,
            total_requests: total,
            successes,
            failures,
            failure_pct: failure_pct(total, failures),
            half_open_inflight: inner.half_open_inflight,
            total_rejected: inner.total_rejected,
            total_transitions: inner.total_transitions,
        }
    }

    /// Forces the circuit open regardless of counters.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Forces the circuit closed regardless of counters.
    pub fn force_closed(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.transition(&mut inner, CircuitState::Closed);
    }

    /// Resets the breaker to a fresh closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.transition(&mut inner, CircuitState::Closed);
        inner.total_rejected = 0;
    }

    fn reject(&self, inner: &mut Inner) -> bool {
        inner.total_rejected += 1;
        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::CallRejected {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
            });
        #[cfg(feature = "metrics")]
        metrics::counter!("circuitbreaker_rejections_total", "circuitbreaker" => self.config.name.clone()).increment(1);
        false
    }

    fn emit_permitted(&self, inner: &Inner) {
        if self.config.event_listeners.is_empty() {
            return;
        }
        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::CallPermitted {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                state: inner.state,
            });
    }

    fn push_sample(&self, inner: &mut Inner, is_failure: bool) {
        if self.config.rolling_window.is_some() {
            inner.samples.push_back(Sample {
                at: Instant::now(),
                is_failure,
            });
            self.trim_window(inner);
        } else if is_failure {
            inner.failures += 1;
        } else {
            inner.successes += 1;
        }
    }

    fn trim_window(&self, inner: &mut Inner) {
        let Some(window) = self.config.rolling_window else {
            return;
        };
        let now = Instant::now();
        while let Some(front) = inner.samples.front() {
            if now.duration_since(front.at) > window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_counts(&self, inner: &Inner) -> (u64, u64, u64) {
        if self.config.rolling_window.is_some() {
            let failures = inner.samples.iter().filter(|s| s.is_failure).count() as u64;
            let total = inner.samples.len() as u64;
            (total, failures, total - failures)
        } else {
            let total = inner.successes + inner.failures;
            (total, inner.failures, inner.successes)
        }
    }

    fn evaluate(&self, inner: &mut Inner) {
        self.trim_window(inner);
        let (total, failures, _) = self.window_counts(inner);
        if total < self.config.minimum_requests {
            return;
        }
        if failure_pct(total, failures) >= self.config.failure_threshold_pct {
            self.transition(inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        inner.total_transitions += 1;
        inner.opened_at = (to == CircuitState::Open).then(Instant::now);
        inner.half_open_inflight = 0;
        inner.successes = 0;
        inner.failures = 0;
        inner.samples.clear();

        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::StateTransition {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                from_state: from,
                to_state: to,
            });

        #[cfg(feature = "tracing")]
        tracing::info!(
            circuitbreaker = %self.config.name,
            from = from.as_str(),
            to = to.as_str(),
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "circuitbreaker_transitions_total",
            "circuitbreaker" => self.config.name.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}

fn failure_pct(total: u64, failures: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failures as f64 / total as f64 * 100.0
    }
}
