//! Circuit breaker configuration.

use crate::events::CircuitBreakerEvent;
use crate::{CircuitBreaker, CircuitState};
use stanchion_core::events::{EventListeners, FnListener};
use std::time::Duration;

/// Configuration for a [`CircuitBreaker`].
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold_pct: f64,
    pub(crate) minimum_requests: u64,
    pub(crate) recovery_timeout: Duration,
    pub(crate) half_open_max: usize,
    pub(crate) rolling_window: Option<Duration>,
    pub(crate) track_individual_attempts: bool,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) name: String,
}

impl CircuitBreakerConfig {
    /// Creates a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder {
    failure_threshold_pct: f64,
    minimum_requests: u64,
    recovery_timeout: Duration,
    half_open_max: usize,
    rolling_window: Option<Duration>,
    track_individual_attempts: bool,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    name: String,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults: 50% failure threshold, 5 minimum requests, 30s recovery
    /// timeout, 1 half-open probe, cumulative (non-rolling) counters.
    pub fn new() -> Self {
        Self {
            failure_threshold_pct: 50.0,
            minimum_requests: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max: 1,
            rolling_window: None,
            track_individual_attempts: false,
            event_listeners: EventListeners::new(),
            name: "<unnamed>".to_string(),
        }
    }

    /// Failure percentage (0-100) at which the circuit opens.
    ///
    /// Default: 50.0
    pub fn failure_threshold_pct(mut self, pct: f64) -> Self {
        self.failure_threshold_pct = pct;
        self
    }

    /// Minimum recorded calls before the threshold is evaluated.
    ///
    /// Default: 5
    pub fn minimum_requests(mut self, n: u64) -> Self {
        self.minimum_requests = n;
        self
    }

    /// How long the circuit stays open before admitting a probe.
    ///
    /// Default: 30 seconds
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Maximum in-flight probes in the half-open state.
    ///
    /// Default: 1
    pub fn half_open_max(mut self, n: usize) -> Self {
        self.half_open_max = n.max(1);
        self
    }

    /// Evaluate the failure ratio over a rolling time window instead of
    /// cumulative counters; samples older than the window are dropped.
    ///
    /// Default: disabled
    pub fn rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = Some(window);
        self
    }

    /// Consult the breaker before every retry attempt, not just the first,
    /// and record each attempt's outcome individually.
    ///
    /// Default: false
    pub fn track_individual_attempts(mut self, enabled: bool) -> Self {
        self.track_individual_attempts = enabled;
        self
    }

    /// Human-readable name used in events, logs, and metric labels.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback for state transitions.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(*from_state, *to_state);
                }
            }));
        self
    }

    /// Registers a callback for rejected calls.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if matches!(event, CircuitBreakerEvent::CallRejected { .. }) {
                    f();
                }
            }));
        self
    }

    /// Finishes the configuration.
    pub fn build_config(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold_pct: self.failure_threshold_pct,
            minimum_requests: self.minimum_requests,
            recovery_timeout: self.recovery_timeout,
            half_open_max: self.half_open_max,
            rolling_window: self.rolling_window,
            track_individual_attempts: self.track_individual_attempts,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }

    /// Builds the breaker directly.
    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::new(self.build_config())
    }
}
