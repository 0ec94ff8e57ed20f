//! The attempt engine: a retry loop with analyzers, hooks, jitter, gates,
//! and trial-mode fault injection applied uniformly to requests and
//! functions.

use crate::backoff::compute_delay;
use crate::config::AttemptConfig;
use crate::config::AttemptOverrides;
use crate::events::EngineEvent;
use crate::item::{ExecutionItem, FunctionItem};
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use stanchion_cache::ResponseCache;
use stanchion_core::{
    merge_values, AttemptLog, AttemptOutcome, Error, ExecutionContext, HookArgs,
    PersistenceCoordinator, RequestSpec, Result, Transport, TransportRequest,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The output of one invocation of the underlying callable.
#[derive(Debug, Clone)]
pub struct CallOutput {
    pub data: Value,
    pub status_code: Option<u16>,
    pub from_cache: bool,
}

/// The opaque "do once" callable the loop drives.
pub type DoOnce = Arc<dyn Fn() -> BoxFuture<'static, Result<CallOutput>> + Send + Sync>;

/// Hook environment threaded through a run: where we are in the composite
/// tree, the shared buffer snapshot, and the persistence bracket.
#[derive(Clone, Default)]
pub struct HookEnv {
    pub coordinator: PersistenceCoordinator,
    pub context: ExecutionContext,
    pub buffer: Value,
    pub transaction_logs: Option<Vec<Value>>,
}

impl HookEnv {
    pub fn for_context(context: ExecutionContext) -> Self {
        Self {
            context,
            buffer: Value::Object(serde_json::Map::new()),
            ..Self::default()
        }
    }
}

/// Counters for one attempt-engine run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    pub attempts_made: u32,
    pub retries: u32,
    pub successful_attempts: u32,
    pub failed_attempts: u32,
    pub analyzer_rejections: u32,
    pub trial_draws: u32,
    pub total_backoff_ms: u64,
    pub total_time_ms: u64,
    pub cache_hit: bool,
    pub circuit_rejected: bool,
}

/// The structured result of an attempt-engine run. The engine never panics
/// or throws; failures are reported through `success`/`error`.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// The final error, kept structured so composite layers can classify.
    #[serde(skip)]
    pub error_kind: Option<Error>,
    /// True when the final error analyzer absorbed the failure.
    pub error_absorbed: bool,
    pub from_cache: bool,
    pub error_logs: Vec<AttemptLog>,
    pub successful_attempts: Vec<AttemptLog>,
    pub metrics: EngineMetrics,
}

impl AttemptReport {
    /// Marker for items suppressed by stop-on-first-error.
    pub fn not_executed() -> Self {
        let err = Error::NotExecuted;
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err),
            error_absorbed: false,
            from_cache: false,
            error_logs: Vec::new(),
            successful_attempts: Vec::new(),
            metrics: EngineMetrics::default(),
        }
    }

    /// Marker for racing losers and aborted work.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        let err = Error::Cancelled(reason.into());
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err),
            error_absorbed: false,
            from_cache: false,
            error_logs: Vec::new(),
            successful_attempts: Vec::new(),
            metrics: EngineMetrics::default(),
        }
    }

    /// True when the failure was the circuit breaker refusing the call.
    pub fn is_circuit_open(&self) -> bool {
        self.error_kind
            .as_ref()
            .map(Error::is_circuit_open)
            .unwrap_or(false)
    }
}

/// Drives attempt loops against a transport.
#[derive(Clone)]
pub struct AttemptEngine {
    transport: Arc<dyn Transport>,
}

impl AttemptEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The engine's transport, shared with composites that build their own
    /// item closures.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Runs the attempt loop for a request descriptor.
    pub async fn execute_request(
        &self,
        spec: &RequestSpec,
        config: &AttemptConfig,
        env: &HookEnv,
    ) -> AttemptReport {
        let do_once = request_do_once(
            Arc::clone(&self.transport),
            spec.clone(),
            config.cache.clone(),
            spec.timeout.or(config.timeout),
        );
        let mut env = env.clone();
        if env.context.request_id.is_none() {
            env.context.request_id = spec.id.clone();
        }
        run_attempts(do_once, config, &env).await
    }

    /// Runs the attempt loop for a function item.
    pub async fn execute_function(
        &self,
        item: &FunctionItem,
        config: &AttemptConfig,
        env: &HookEnv,
    ) -> AttemptReport {
        let do_once = function_do_once(item.clone(), config.timeout);
        let mut env = env.clone();
        if env.context.function_id.is_none() {
            env.context.function_id = item.id.clone();
        }
        run_attempts(do_once, config, &env).await
    }

    /// Runs the attempt loop for either item kind.
    pub async fn execute_item(
        &self,
        item: &ExecutionItem,
        config: &AttemptConfig,
        env: &HookEnv,
    ) -> AttemptReport {
        match item {
            ExecutionItem::Request(spec) => self.execute_request(spec, config, env).await,
            ExecutionItem::Function(function) => {
                self.execute_function(function, config, env).await
            }
        }
    }
}

fn request_do_once(
    transport: Arc<dyn Transport>,
    spec: RequestSpec,
    cache: Option<Arc<ResponseCache>>,
    timeout: Option<Duration>,
) -> DoOnce {
    Arc::new(move || {
        let transport = Arc::clone(&transport);
        let cache = cache.clone();
        let spec = spec.clone();
        Box::pin(async move {
            if let Some(cache) = &cache {
                if let Some(hit) = cache.get(&spec) {
                    return Ok(CallOutput {
                        data: hit.data,
                        status_code: Some(hit.status),
                        from_cache: true,
                    });
                }
            }

            let request = TransportRequest::from_spec(&spec);
            let dispatch = transport.dispatch(request);
            let response = match timeout {
                Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(Error::Timeout {
                            scope: "request".to_string(),
                            elapsed: limit,
                        })
                    }
                },
                None => dispatch.await?,
            };

            if !response.is_success() {
                return Err(Error::from_status(
                    response.status,
                    format!("HTTP {} {}", response.status, response.status_text),
                ));
            }
            if let Some(cache) = &cache {
                cache.set(&spec, &response);
            }
            Ok(CallOutput {
                data: response.body,
                status_code: Some(response.status),
                from_cache: false,
            })
        })
    })
}

fn function_do_once(item: FunctionItem, timeout: Option<Duration>) -> DoOnce {
    Arc::new(move || {
        let item = item.clone();
        Box::pin(async move {
            let call = (item.f)(item.params.clone());
            let call = async move {
                match &item.cancel {
                    Some(cancel) => {
                        tokio::select! {
                            _ = cancel.cancelled() => Err(Error::Cancelled(
                                "function aborted before completion".to_string(),
                            )),
                            out = call => out,
                        }
                    }
                    None => call.await,
                }
            };
            let data = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(Error::Timeout {
                            scope: "function".to_string(),
                            elapsed: limit,
                        })
                    }
                },
                None => call.await?,
            };
            Ok(CallOutput {
                data,
                status_code: None,
                from_cache: false,
            })
        })
    })
}

async fn execute_gated(config: &AttemptConfig, do_once: &DoOnce) -> Result<CallOutput> {
    if let Some(limiter) = &config.rate_limiter {
        limiter.acquire().await?;
    }
    let fut = do_once();
    match &config.bulkhead {
        Some(bulkhead) => bulkhead.execute(fut).await?,
        None => fut.await,
    }
}

/// Runs the full attempt loop for an opaque callable.
pub async fn run_attempts(do_once: DoOnce, base: &AttemptConfig, env: &HookEnv) -> AttemptReport {
    let run_started = Instant::now();
    let mut config = base.clone();
    let mut buffer = env.buffer.clone();
    let mut metrics = EngineMetrics::default();

    // Upfront validation: jitter and trial probabilities.
    if let Err(err) = validate(&config) {
        return finish_error(&config, err, Vec::new(), Vec::new(), metrics, run_started).await;
    }

    // Pre-execution hook, optionally overriding live options.
    if let Some(pre) = config.pre_execution.clone() {
        let args = HookArgs {
            execution_context: env.context.clone(),
            params: None,
            buffer: buffer.clone(),
            transaction_logs: env.transaction_logs.clone(),
        };
        match (pre.hook)(args).await {
            Ok(returned) => {
                if pre.apply_override {
                    AttemptOverrides::from_value(&returned).apply_to(&mut config);
                }
                merge_values(&mut buffer, &returned);
            }
            Err(err) => {
                tracing::warn!(engine = %config.name, error = %err, "pre-execution hook failed");
                if !pre.continue_on_failure {
                    return finish_error(
                        &config,
                        Error::Hook(err.to_string()),
                        Vec::new(),
                        Vec::new(),
                        metrics,
                        run_started,
                    )
                    .await;
                }
            }
        }
    }

    let mut rng = match config.trial_mode.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut error_logs: Vec<AttemptLog> = Vec::new();
    let mut success_logs: Vec<AttemptLog> = Vec::new();
    let mut last_error: Option<Error> = None;
    let mut last_success: Option<Value> = None;
    let mut last_attempt_ok = false;
    let mut analyzer_rejected_last = false;

    'attempts: for attempt in 1..=config.attempts {
        // Circuit gate on the first attempt, or on every attempt when the
        // breaker tracks them individually.
        if let Some(breaker) = &config.circuit_breaker {
            if (attempt == 1 || breaker.track_individual_attempts()) && !breaker.can_execute() {
                metrics.circuit_rejected = true;
                last_error = Some(Error::CircuitOpen);
                config.event_listeners.emit(&EngineEvent::CircuitShortCircuit {
                    name: config.name.clone(),
                    timestamp: Instant::now(),
                    attempt,
                });
                tracing::debug!(engine = %config.name, attempt, "circuit open; aborting attempts");
                break 'attempts;
            }
        }

        metrics.attempts_made += 1;
        config.event_listeners.emit(&EngineEvent::AttemptStarted {
            name: config.name.clone(),
            timestamp: Instant::now(),
            attempt,
        });

        let attempt_started = Instant::now();
        let exec_result: Result<CallOutput> = if config.trial_mode.enabled {
            metrics.trial_draws += 1;
            let probability = if attempt == 1 {
                config.trial_mode.req_failure_probability
            } else {
                config.trial_mode.retry_failure_probability
            };
            let simulated_failure = rng.gen::<f64>() < probability;
            config.event_listeners.emit(&EngineEvent::TrialDraw {
                name: config.name.clone(),
                timestamp: Instant::now(),
                attempt,
                simulated_failure,
            });
            if simulated_failure {
                Err(Error::Transport {
                    status_code: None,
                    retryable: true,
                    message: "trial mode simulated failure".to_string(),
                })
            } else {
                Ok(CallOutput {
                    data: config.trial_mode.sentinel(),
                    status_code: None,
                    from_cache: false,
                })
            }
        } else {
            execute_gated(&config, &do_once).await
        };
        let execution_time = attempt_started.elapsed();

        match exec_result {
            Ok(out) if out.from_cache => {
                metrics.cache_hit = true;
                metrics.successful_attempts += 1;
                metrics.total_time_ms = run_started.elapsed().as_millis() as u64;
                let data = if config.return_result {
                    Some(out.data)
                } else {
                    Some(Value::Bool(true))
                };
                return AttemptReport {
                    success: true,
                    data,
                    error: None,
                    error_kind: None,
                    error_absorbed: false,
                    from_cache: true,
                    error_logs,
                    successful_attempts: success_logs,
                    metrics,
                };
            }
            Ok(out) => {
                let verdict = match &config.response_analyzer {
                    Some(analyzer) => match analyzer(out.data.clone()).await {
                        Ok(verdict) => verdict,
                        Err(err) => {
                            // Analyzer failures degrade conservatively to a
                            // retry.
                            tracing::warn!(engine = %config.name, error = %err, "response analyzer failed; forcing retry");
                            false
                        }
                    },
                    None => true,
                };

                if verdict {
                    last_attempt_ok = true;
                    analyzer_rejected_last = false;
                    last_success = Some(out.data.clone());
                    metrics.successful_attempts += 1;

                    if config.log_attempts {
                        let outcome =
                            AttemptOutcome::success(out.data.clone(), out.status_code, execution_time);
                        let log = AttemptLog::from_outcome(attempt, &outcome, false);
                        success_logs.push(log.clone());
                        if let Some(hook) = &config.handle_success {
                            let (next, result) = env
                                .coordinator
                                .invoke(
                                    hook,
                                    &env.context,
                                    serde_json::to_value(&log).ok(),
                                    buffer.clone(),
                                    env.transaction_logs.clone(),
                                )
                                .await;
                            buffer = next;
                            if let Err(err) = result {
                                tracing::warn!(engine = %config.name, error = %err, "success hook failed; continuing");
                            }
                        }
                    }

                    if let Some(breaker) = &config.circuit_breaker {
                        if breaker.track_individual_attempts() {
                            breaker.record_success();
                        }
                    }
                    config.event_listeners.emit(&EngineEvent::AttemptSucceeded {
                        name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempt,
                    });

                    if !config.perform_all_attempts {
                        break 'attempts;
                    }
                } else {
                    analyzer_rejected_last = true;
                    last_attempt_ok = false;
                    metrics.analyzer_rejections += 1;
                    metrics.failed_attempts += 1;
                    let err =
                        Error::InvalidContent("response analyzer rejected the payload".to_string());
                    config.event_listeners.emit(&EngineEvent::ContentRejected {
                        name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempt,
                    });

                    if config.log_attempts {
                        let outcome = AttemptOutcome {
                            ok: true,
                            retryable: true,
                            status_code: out.status_code,
                            execution_time,
                            timestamp: chrono::Utc::now(),
                            data: Some(out.data.clone()),
                            error: Some(err.to_string()),
                            from_cache: false,
                        };
                        let log = AttemptLog::from_outcome(attempt, &outcome, true);
                        error_logs.push(log.clone());
                        buffer = run_error_hook(&config, env, &log, buffer).await;
                    }
                    last_error = Some(err);

                    if record_failure_and_check_open(&config) {
                        metrics.circuit_rejected = true;
                        break 'attempts;
                    }
                }
            }
            Err(err) => {
                if err.is_circuit_open() {
                    metrics.circuit_rejected = true;
                    last_error = Some(err);
                    break 'attempts;
                }
                last_attempt_ok = false;
                analyzer_rejected_last = false;
                metrics.failed_attempts += 1;
                config.event_listeners.emit(&EngineEvent::AttemptFailed {
                    name: config.name.clone(),
                    timestamp: Instant::now(),
                    attempt,
                    retryable: err.is_retryable(),
                });

                if config.log_attempts {
                    let outcome = AttemptOutcome::failure(&err, execution_time);
                    let log = AttemptLog::from_outcome(attempt, &outcome, false);
                    error_logs.push(log.clone());
                    buffer = run_error_hook(&config, env, &log, buffer).await;
                }

                let fatal = !err.is_retryable();
                last_error = Some(err);

                if record_failure_and_check_open(&config) {
                    metrics.circuit_rejected = true;
                    break 'attempts;
                }
                if fatal {
                    break 'attempts;
                }
            }
        }

        if attempt < config.attempts {
            let should_retry = config.perform_all_attempts
                || analyzer_rejected_last
                || (!last_attempt_ok
                    && last_error
                        .as_ref()
                        .map(Error::is_retryable)
                        .unwrap_or(false));
            if !should_retry {
                break 'attempts;
            }
            let delay = compute_delay(
                config.retry_strategy,
                config.wait,
                attempt,
                config.jitter,
                config.max_allowed_wait,
                &mut rng,
            );
            metrics.retries += 1;
            metrics.total_backoff_ms += delay.as_millis() as u64;
            config.event_listeners.emit(&EngineEvent::RetryScheduled {
                name: config.name.clone(),
                timestamp: Instant::now(),
                attempt,
                delay,
            });
            tracing::debug!(engine = %config.name, attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
            tokio::time::sleep(delay).await;
        }
    }

    metrics.total_time_ms = run_started.elapsed().as_millis() as u64;

    let succeeded = if config.perform_all_attempts {
        last_success.is_some()
    } else {
        last_attempt_ok
    };

    if succeeded {
        let payload = last_success.unwrap_or(Value::Null);
        let data = if config.return_result {
            Some(payload)
        } else {
            Some(Value::Bool(true))
        };
        return AttemptReport {
            success: true,
            data,
            error: None,
            error_kind: None,
            error_absorbed: false,
            from_cache: false,
            error_logs,
            successful_attempts: success_logs,
            metrics,
        };
    }

    let err = last_error
        .unwrap_or_else(|| Error::Validation("attempt loop produced no outcome".to_string()));
    finish_error(&config, err, error_logs, success_logs, metrics, run_started).await
}

fn validate(config: &AttemptConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&config.jitter) || config.jitter.is_nan() {
        return Err(Error::Validation(format!(
            "jitter must be within [0, 1], got {}",
            config.jitter
        )));
    }
    config.trial_mode.validate()
}

fn record_failure_and_check_open(config: &AttemptConfig) -> bool {
    if let Some(breaker) = &config.circuit_breaker {
        if breaker.track_individual_attempts() {
            breaker.record_failure();
            // A trip to open mid-loop aborts the remaining attempts.
            return breaker.state() == stanchion_circuitbreaker::CircuitState::Open;
        }
    }
    false
}

async fn run_error_hook(
    config: &AttemptConfig,
    env: &HookEnv,
    log: &AttemptLog,
    buffer: Value,
) -> Value {
    let Some(hook) = &config.handle_errors else {
        return buffer;
    };
    let (next, result) = env
        .coordinator
        .invoke(
            hook,
            &env.context,
            serde_json::to_value(log).ok(),
            buffer,
            env.transaction_logs.clone(),
        )
        .await;
    if let Err(err) = result {
        tracing::warn!(engine = %config.name, error = %err, "error hook failed; continuing");
    }
    next
}

async fn finish_error(
    config: &AttemptConfig,
    err: Error,
    error_logs: Vec<AttemptLog>,
    success_logs: Vec<AttemptLog>,
    mut metrics: EngineMetrics,
    run_started: Instant,
) -> AttemptReport {
    metrics.total_time_ms = run_started.elapsed().as_millis() as u64;

    let absorbed = match &config.final_error_analyzer {
        Some(analyzer) => match analyzer(err.clone()).await {
            Ok(verdict) => verdict,
            Err(analyzer_err) => {
                // The analyzer itself failing re-raises the original error.
                tracing::warn!(engine = %config.name, error = %analyzer_err, "final error analyzer failed");
                false
            }
        },
        None => false,
    };

    if absorbed {
        AttemptReport {
            success: false,
            data: None,
            error: None,
            error_kind: None,
            error_absorbed: true,
            from_cache: false,
            error_logs,
            successful_attempts: success_logs,
            metrics,
        }
    } else {
        AttemptReport {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err),
            error_absorbed: false,
            from_cache: false,
            error_logs,
            successful_attempts: success_logs,
            metrics,
        }
    }
}
