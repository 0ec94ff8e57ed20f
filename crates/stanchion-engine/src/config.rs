//! Attempt engine configuration.

use crate::backoff::RetryStrategy;
use crate::events::EngineEvent;
use futures::future::BoxFuture;
use serde_json::Value;
use stanchion_bulkhead::Bulkhead;
use stanchion_cache::ResponseCache;
use stanchion_circuitbreaker::CircuitBreaker;
use stanchion_core::events::EventListeners;
use stanchion_core::{Error, Result, StateHook};
use stanchion_ratelimiter::RateLimiter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Verdict callable applied to each ok response; a `false` (or failed)
/// verdict demotes the attempt to a retryable invalid-content failure.
pub type ResponseAnalyzer = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Wraps an async closure as a [`ResponseAnalyzer`].
pub fn response_analyzer<F, Fut>(f: F) -> ResponseAnalyzer
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(move |data| Box::pin(f(data)))
}

/// Wraps a synchronous predicate as a [`ResponseAnalyzer`].
pub fn sync_response_analyzer<F>(f: F) -> ResponseAnalyzer
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Arc::new(move |data| {
        let verdict = f(&data);
        Box::pin(async move { Ok(verdict) })
    })
}

/// Last-resort error analyzer. A truthy return absorbs the error: the
/// attempt report carries `success: false` and no error kind.
pub type FinalErrorAnalyzer =
    Arc<dyn Fn(Error) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Wraps a synchronous closure as a [`FinalErrorAnalyzer`].
pub fn final_error_analyzer<F>(f: F) -> FinalErrorAnalyzer
where
    F: Fn(&Error) -> bool + Send + Sync + 'static,
{
    Arc::new(move |error| {
        let verdict = f(&error);
        Box::pin(async move { Ok(verdict) })
    })
}

/// Trial mode bypasses the transport and simulates outcomes with Bernoulli
/// draws, so recovery paths can be exercised without a network.
#[derive(Clone, Debug)]
pub struct TrialModeConfig {
    pub enabled: bool,
    /// Failure probability for the first attempt, in `[0, 1]`.
    pub req_failure_probability: f64,
    /// Failure probability for retries, in `[0, 1]`.
    pub retry_failure_probability: f64,
    /// Optional seed for deterministic draws.
    pub seed: Option<u64>,
}

impl Default for TrialModeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            req_failure_probability: 0.0,
            retry_failure_probability: 0.0,
            seed: None,
        }
    }
}

impl TrialModeConfig {
    /// Validates both probabilities are within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for (label, p) in [
            ("req_failure_probability", self.req_failure_probability),
            ("retry_failure_probability", self.retry_failure_probability),
        ] {
            if !(0.0..=1.0).contains(&p) || p.is_nan() {
                return Err(Error::Validation(format!(
                    "trial mode {label} must be within [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }

    /// The sentinel payload returned for simulated successes.
    pub fn sentinel(&self) -> Value {
        serde_json::json!({
            "trialMode": {
                "enabled": self.enabled,
                "reqFailureProbability": self.req_failure_probability,
                "retryFailureProbability": self.retry_failure_probability,
            }
        })
    }
}

/// Pre-execution hook configuration.
#[derive(Clone)]
pub struct PreExecutionConfig {
    pub hook: StateHook,
    /// Shallow-merge the hook's returned object into the live options.
    pub apply_override: bool,
    /// When false, a hook failure fails the whole run.
    pub continue_on_failure: bool,
}

/// A sparse overlay of attempt options, used for pre-execution overrides
/// and workflow-to-item configuration merging. Set keys win over the base.
#[derive(Clone, Debug, Default)]
pub struct AttemptOverrides {
    pub attempts: Option<u32>,
    pub wait: Option<Duration>,
    pub retry_strategy: Option<RetryStrategy>,
    pub jitter: Option<f64>,
    pub max_allowed_wait: Option<Duration>,
    pub perform_all_attempts: Option<bool>,
    pub return_result: Option<bool>,
    pub timeout: Option<Duration>,
}

impl AttemptOverrides {
    /// Reads recognized keys from a JSON object (as returned by a
    /// pre-execution hook). Unknown keys pass through untouched.
    pub fn from_value(value: &Value) -> Self {
        let mut overrides = Self::default();
        let Some(map) = value.as_object() else {
            return overrides;
        };
        overrides.attempts = map.get("attempts").and_then(Value::as_u64).map(|n| n as u32);
        overrides.wait = map
            .get("waitMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        overrides.retry_strategy = map
            .get("retryStrategy")
            .and_then(Value::as_str)
            .and_then(|s| match s {
                "FIXED" => Some(RetryStrategy::Fixed),
                "LINEAR" => Some(RetryStrategy::Linear),
                "EXPONENTIAL" => Some(RetryStrategy::Exponential),
                _ => None,
            });
        overrides.jitter = map.get("jitter").and_then(Value::as_f64);
        overrides.max_allowed_wait = map
            .get("maxAllowedWaitMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        overrides.perform_all_attempts = map.get("performAllAttempts").and_then(Value::as_bool);
        overrides.return_result = map.get("returnResult").and_then(Value::as_bool);
        overrides.timeout = map
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        overrides
    }

    /// Layers `over` on top of `self`: keys set in `over` win.
    pub fn layered_with(&self, over: &AttemptOverrides) -> AttemptOverrides {
        AttemptOverrides {
            attempts: over.attempts.or(self.attempts),
            wait: over.wait.or(self.wait),
            retry_strategy: over.retry_strategy.or(self.retry_strategy),
            jitter: over.jitter.or(self.jitter),
            max_allowed_wait: over.max_allowed_wait.or(self.max_allowed_wait),
            perform_all_attempts: over.perform_all_attempts.or(self.perform_all_attempts),
            return_result: over.return_result.or(self.return_result),
            timeout: over.timeout.or(self.timeout),
        }
    }

    /// Applies set keys onto a config.
    pub fn apply_to(&self, config: &mut AttemptConfig) {
        if let Some(v) = self.attempts {
            config.attempts = v;
        }
        if let Some(v) = self.wait {
            config.wait = v;
        }
        if let Some(v) = self.retry_strategy {
            config.retry_strategy = v;
        }
        if let Some(v) = self.jitter {
            config.jitter = v;
        }
        if let Some(v) = self.max_allowed_wait {
            config.max_allowed_wait = v;
        }
        if let Some(v) = self.perform_all_attempts {
            config.perform_all_attempts = v;
        }
        if let Some(v) = self.return_result {
            config.return_result = v;
        }
        if let Some(v) = self.timeout {
            config.timeout = Some(v);
        }
    }

    /// True when no keys are set.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_none()
            && self.wait.is_none()
            && self.retry_strategy.is_none()
            && self.jitter.is_none()
            && self.max_allowed_wait.is_none()
            && self.perform_all_attempts.is_none()
            && self.return_result.is_none()
            && self.timeout.is_none()
    }
}

/// Configuration for the attempt engine.
#[derive(Clone)]
pub struct AttemptConfig {
    pub(crate) name: String,
    pub(crate) attempts: u32,
    pub(crate) wait: Duration,
    pub(crate) retry_strategy: RetryStrategy,
    pub(crate) jitter: f64,
    pub(crate) max_allowed_wait: Duration,
    pub(crate) perform_all_attempts: bool,
    pub(crate) return_result: bool,
    pub(crate) log_attempts: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) response_analyzer: Option<ResponseAnalyzer>,
    pub(crate) handle_errors: Option<StateHook>,
    pub(crate) handle_success: Option<StateHook>,
    pub(crate) final_error_analyzer: Option<FinalErrorAnalyzer>,
    pub(crate) trial_mode: TrialModeConfig,
    pub(crate) pre_execution: Option<PreExecutionConfig>,
    pub(crate) cache: Option<Arc<ResponseCache>>,
    pub(crate) circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) bulkhead: Option<Arc<Bulkhead>>,
    pub(crate) load_transaction_logs: bool,
    pub(crate) event_listeners: EventListeners<EngineEvent>,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AttemptConfig {
    /// Creates a configuration builder.
    pub fn builder() -> AttemptConfigBuilder {
        AttemptConfigBuilder::new()
    }

    /// Whether hooks should receive the buffer's transaction logs.
    pub fn loads_transaction_logs(&self) -> bool {
        self.load_transaction_logs
    }
}

/// Builder for [`AttemptConfig`].
pub struct AttemptConfigBuilder {
    config: AttemptConfig,
}

impl Default for AttemptConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults: 3 attempts, 100ms fixed wait, no jitter, 30s wait cap,
    /// attempt logging on, `return_result` off.
    pub fn new() -> Self {
        Self {
            config: AttemptConfig {
                name: "<unnamed>".to_string(),
                attempts: 3,
                wait: Duration::from_millis(100),
                retry_strategy: RetryStrategy::Fixed,
                jitter: 0.0,
                max_allowed_wait: Duration::from_secs(30),
                perform_all_attempts: false,
                return_result: false,
                log_attempts: true,
                timeout: None,
                response_analyzer: None,
                handle_errors: None,
                handle_success: None,
                final_error_analyzer: None,
                trial_mode: TrialModeConfig::default(),
                pre_execution: None,
                cache: None,
                circuit_breaker: None,
                rate_limiter: None,
                bulkhead: None,
                load_transaction_logs: false,
                event_listeners: EventListeners::new(),
            },
        }
    }

    /// Total attempts, including the first. Default: 3.
    pub fn attempts(mut self, n: u32) -> Self {
        self.config.attempts = n.max(1);
        self
    }

    /// Base wait between attempts. Default: 100ms.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.config.wait = wait;
        self
    }

    /// Back-off growth strategy. Default: fixed.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.config.retry_strategy = strategy;
        self
    }

    /// Jitter magnitude in `[0, 1]`. Default: 0.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Upper bound for any single back-off sleep. Default: 30s.
    pub fn max_allowed_wait(mut self, max: Duration) -> Self {
        self.config.max_allowed_wait = max;
        self
    }

    /// Run every attempt even after a success, returning the last
    /// successful payload. Default: false.
    pub fn perform_all_attempts(mut self, enabled: bool) -> Self {
        self.config.perform_all_attempts = enabled;
        self
    }

    /// Populate `data` with the response payload instead of `true`.
    /// Default: false.
    pub fn return_result(mut self, enabled: bool) -> Self {
        self.config.return_result = enabled;
        self
    }

    /// Record per-attempt logs and invoke the logging hooks. Default: true.
    pub fn log_attempts(mut self, enabled: bool) -> Self {
        self.config.log_attempts = enabled;
        self
    }

    /// Per-execution timeout applied to the underlying callable.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Semantic verdict on ok responses; see [`ResponseAnalyzer`].
    pub fn response_analyzer(mut self, analyzer: ResponseAnalyzer) -> Self {
        self.config.response_analyzer = Some(analyzer);
        self
    }

    /// Observability hook invoked with each failed attempt's log entry.
    pub fn handle_errors(mut self, hook: StateHook) -> Self {
        self.config.handle_errors = Some(hook);
        self
    }

    /// Observability hook invoked with each successful attempt's payload.
    pub fn handle_successful_attempt_data(mut self, hook: StateHook) -> Self {
        self.config.handle_success = Some(hook);
        self
    }

    /// Last-resort analyzer; a truthy return absorbs the final error.
    pub fn final_error_analyzer(mut self, analyzer: FinalErrorAnalyzer) -> Self {
        self.config.final_error_analyzer = Some(analyzer);
        self
    }

    /// Enables trial mode with the given probabilities.
    pub fn trial_mode(mut self, trial: TrialModeConfig) -> Self {
        self.config.trial_mode = trial;
        self
    }

    /// Pre-execution hook, optionally overriding live options.
    pub fn pre_execution(mut self, pre: PreExecutionConfig) -> Self {
        self.config.pre_execution = Some(pre);
        self
    }

    /// Response cache consulted before dispatch and populated after.
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.config.cache = Some(cache);
        self
    }

    /// Circuit breaker gating attempts.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.config.circuit_breaker = Some(breaker);
        self
    }

    /// Rate limiter acquired before each execution.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.config.rate_limiter = Some(limiter);
        self
    }

    /// Concurrency limiter wrapping each execution.
    pub fn bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.config.bulkhead = Some(bulkhead);
        self
    }

    /// Pass buffer transaction logs to hooks.
    pub fn load_transaction_logs(mut self, enabled: bool) -> Self {
        self.config.load_transaction_logs = enabled;
        self
    }

    /// Human-readable name used in events and logs.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.config.name = name.into();
        self
    }

    /// Registers a callback invoked before each back-off sleep.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        use stanchion_core::events::FnListener;
        self.config
            .event_listeners
            .add(FnListener::new(move |event: &EngineEvent| {
                if let EngineEvent::RetryScheduled { attempt, delay, .. } = event {
                    f(*attempt, *delay);
                }
            }));
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> AttemptConfig {
        self.config
    }
}
