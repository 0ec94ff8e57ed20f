//! Timer-driven job scheduler.
//!
//! Jobs carry a [`Schedule`] (interval, cron, timestamp, or timestamp list)
//! and run through a tick loop: each tick enqueues due jobs into a bounded
//! FIFO queue and drains it while fewer than `max_parallel` runs are in
//! flight. A job never overlaps itself. Failed runs retry with linear or
//! exponential back-off before falling back to the regular schedule.
//! Scheduler state (jobs, counters, shared-buffer contents) serializes
//! through [`SchedulerState`] and restores across restarts via an optional
//! [`SchedulerPersistence`] adapter with debounced saves.

mod cron;
mod state;

pub use cron::CronExpression;
pub use state::{
    JobContext, JobFn, JobSpec, JobState, RetryBackoff, RetryPolicy, Schedule, SchedulerPersistence,
    SchedulerState, SchedulerStats,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use stanchion_buffer::StableBuffer;
use stanchion_bulkhead::Bulkhead;
use stanchion_circuitbreaker::CircuitBreaker;
use stanchion_core::{Error, Result};
use stanchion_ratelimiter::RateLimiter;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scheduler configuration.
pub struct SchedulerConfig {
    /// Tick period; clamped to at least 50ms.
    pub tick_interval: Duration,
    /// Maximum concurrently running jobs.
    pub max_parallel: usize,
    /// Queue capacity; due jobs beyond it are dropped (and counted).
    pub queue_limit: usize,
    /// Retry policy applied when a job has none of its own.
    pub default_retry: Option<RetryPolicy>,
    /// Default per-run execution timeout.
    pub execution_timeout: Option<Duration>,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub bulkhead: Option<Arc<Bulkhead>>,
    /// Hand buffer transaction logs to each job run.
    pub load_transaction_logs: bool,
    pub persistence: Option<Arc<dyn SchedulerPersistence>>,
    pub persistence_debounce: Duration,
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            max_parallel: 4,
            queue_limit: 100,
            default_retry: None,
            execution_timeout: None,
            circuit_breaker: None,
            rate_limiter: None,
            bulkhead: None,
            load_transaction_logs: false,
            persistence: None,
            persistence_debounce: Duration::from_secs(1),
            name: "<unnamed>".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    pub fn queue_limit(mut self, n: usize) -> Self {
        self.queue_limit = n.max(1);
        self
    }

    pub fn default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    pub fn load_transaction_logs(mut self, enabled: bool) -> Self {
        self.load_transaction_logs = enabled;
        self
    }

    pub fn persistence(mut self, adapter: Arc<dyn SchedulerPersistence>) -> Self {
        self.persistence = Some(adapter);
        self
    }

    pub fn persistence_debounce(mut self, debounce: Duration) -> Self {
        self.persistence_debounce = debounce;
        self
    }

    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }
}

/// Point-in-time scheduler gauges.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    pub total_jobs: usize,
    pub queue_depth: usize,
    pub running: usize,
    pub stats: SchedulerStats,
}

struct JobEntry {
    id: String,
    job: JobFn,
    schedule: Schedule,
    retry: Option<RetryPolicy>,
    execution_timeout: Option<Duration>,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    remaining_timestamps: Vec<DateTime<Utc>>,
    run_once: bool,
    is_running: bool,
    queued: bool,
    retry_attempts: u32,
    runs: u64,
    failures: u64,
}

struct Inner {
    jobs: HashMap<String, JobEntry>,
    order: Vec<String>,
    queue: VecDeque<String>,
    stats: SchedulerStats,
    ticker: Option<(CancellationToken, tokio::task::JoinHandle<()>)>,
}

/// Timer-driven job dispatcher with bounded parallelism and restorable
/// state.
#[derive(Clone)]
pub struct Scheduler {
    config: Arc<SchedulerConfig>,
    inner: Arc<Mutex<Inner>>,
    buffer: Arc<StableBuffer>,
    running: Arc<AtomicUsize>,
    save_pending: Arc<AtomicBool>,
    job_seq: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(mut config: SchedulerConfig) -> Self {
        config.tick_interval = config.tick_interval.max(Duration::from_millis(50));
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                jobs: HashMap::new(),
                order: Vec::new(),
                queue: VecDeque::new(),
                stats: SchedulerStats::default(),
                ticker: None,
            })),
            buffer: Arc::new(StableBuffer::new()),
            running: Arc::new(AtomicUsize::new(0)),
            save_pending: Arc::new(AtomicBool::new(false)),
            job_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A scheduler with default settings.
    pub fn with_defaults() -> Self {
        Self::new(SchedulerConfig::default())
    }

    /// The scheduler's shared buffer, also handed to every job run.
    pub fn buffer(&self) -> Arc<StableBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Registers a job; returns its id. An explicit id replaces any
    /// existing job with the same id.
    pub fn add_job(&self, spec: JobSpec) -> String {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| format!("job-{}", self.job_seq.fetch_add(1, Ordering::Relaxed) + 1));
        let mut remaining = Vec::new();
        let next_run_at = spec.schedule.initial_next_run(Utc::now(), &mut remaining);
        let run_once = spec.schedule.run_once();

        let entry = JobEntry {
            id: id.clone(),
            job: spec.job,
            schedule: spec.schedule,
            retry: spec.retry,
            execution_timeout: spec.execution_timeout.or(self.config.execution_timeout),
            next_run_at,
            last_run_at: None,
            remaining_timestamps: remaining,
            run_once,
            is_running: false,
            queued: false,
            retry_attempts: 0,
            runs: 0,
            failures: 0,
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.jobs.insert(id.clone(), entry).is_none() {
            inner.order.push(id.clone());
        }
        id
    }

    /// Registers several jobs.
    pub fn add_jobs(&self, specs: Vec<JobSpec>) -> Vec<String> {
        specs.into_iter().map(|spec| self.add_job(spec)).collect()
    }

    /// Replaces the whole job table.
    pub fn set_jobs(&self, specs: Vec<JobSpec>) -> Vec<String> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.jobs.clear();
            inner.order.clear();
            inner.queue.clear();
        }
        self.add_jobs(specs)
    }

    /// Removes a job.
    pub fn remove_job(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.order.retain(|existing| existing != id);
        inner.queue.retain(|existing| existing != id);
        inner.jobs.remove(id).is_some()
    }

    /// Loads persisted state (when configured) and starts the tick loop.
    pub async fn start(&self) {
        if let Some(persistence) = &self.config.persistence {
            match persistence.load_state().await {
                Ok(Some(state)) => self.restore_state(state).await,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(scheduler = %self.config.name, error = %err, "state load failed; starting fresh");
                }
            }
        }

        let token = CancellationToken::new();
        let this = self.clone();
        let loop_token = token.clone();
        let interval = self.config.tick_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        this.tick().await;
                    }
                }
            }
        });

        let mut inner = self.inner.lock().unwrap();
        if let Some((old_token, old_handle)) = inner.ticker.replace((token, handle)) {
            old_token.cancel();
            old_handle.abort();
        }
    }

    /// Stops the tick loop and flushes persisted state.
    pub async fn stop(&self) {
        let ticker = self.inner.lock().unwrap().ticker.take();
        if let Some((token, handle)) = ticker {
            token.cancel();
            let _ = handle.await;
        }
        self.persist_now().await;
    }

    /// One scheduling pass: enqueue due jobs, then drain the queue while
    /// capacity remains. Public so callers can drive the scheduler manually.
    pub async fn tick(&self) {
        let now = Utc::now();
        let launches: Vec<(String, JobFn, Option<Duration>, u64)> = {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.ticks += 1;
            let order = inner.order.clone();
            let queue_limit = self.config.queue_limit;

            let Inner {
                jobs, queue, stats, ..
            } = &mut *inner;

            for id in &order {
                let Some(job) = jobs.get_mut(id) else { continue };
                let due = job.next_run_at.map(|at| at <= now).unwrap_or(false);
                if due && !job.is_running && !job.queued {
                    if queue.len() < queue_limit {
                        job.queued = true;
                        queue.push_back(id.clone());
                    } else {
                        stats.dropped += 1;
                        tracing::warn!(scheduler = %self.config.name, job = %id, "queue full; run dropped");
                    }
                }
            }

            let mut launches = Vec::new();
            while self.running.load(Ordering::SeqCst) + launches.len() < self.config.max_parallel {
                let Some(id) = queue.pop_front() else { break };
                let Some(job) = jobs.get_mut(&id) else { continue };
                job.queued = false;
                job.is_running = true;
                job.runs += 1;
                launches.push((
                    id.clone(),
                    Arc::clone(&job.job),
                    job.execution_timeout,
                    job.runs,
                ));
            }
            launches
        };

        for (id, job, timeout, run_number) in launches {
            self.running.fetch_add(1, Ordering::SeqCst);
            let this = self.clone();
            tokio::spawn(async move {
                this.run_job(id, job, timeout, run_number).await;
            });
        }
    }

    async fn run_job(&self, id: String, job: JobFn, timeout: Option<Duration>, run_number: u64) {
        let context = JobContext {
            job_id: id.clone(),
            run_number,
            buffer: Arc::clone(&self.buffer),
            transaction_logs: self
                .config
                .load_transaction_logs
                .then(|| self.buffer.transaction_logs_json()),
        };

        let outcome = self.execute_gated(&job, context, timeout).await;
        let now = Utc::now();

        if let Some(breaker) = &self.config.circuit_breaker {
            match &outcome {
                Ok(_) => breaker.record_success(),
                // A circuit rejection is not a new failure sample.
                Err(err) if err.is_circuit_open() => {}
                Err(_) => breaker.record_failure(),
            }
        }

        {
            let mut inner = self.inner.lock().unwrap();
            let Inner { jobs, stats, .. } = &mut *inner;
            if let Some(job) = jobs.get_mut(&id) {
                job.is_running = false;
                job.last_run_at = Some(now);
                stats.total_runs += 1;
                match &outcome {
                    Ok(_) => {
                        job.retry_attempts = 0;
                        job.next_run_at = job
                            .schedule
                            .next_after_run(now, &mut job.remaining_timestamps);
                    }
                    Err(err) => {
                        stats.total_failures += 1;
                        job.failures += 1;
                        let policy = job.retry.or(self.config.default_retry);
                        match policy {
                            Some(policy) if job.retry_attempts < policy.max_retries => {
                                job.retry_attempts += 1;
                                stats.total_retries += 1;
                                let delay = policy.delay_for(job.retry_attempts);
                                job.next_run_at = Some(
                                    now + ChronoDuration::from_std(delay)
                                        .unwrap_or_else(|_| ChronoDuration::zero()),
                                );
                                tracing::debug!(
                                    scheduler = %self.config.name,
                                    job = %id,
                                    attempt = job.retry_attempts,
                                    delay_ms = delay.as_millis() as u64,
                                    "scheduling retry"
                                );
                            }
                            _ => {
                                job.retry_attempts = 0;
                                job.next_run_at = job
                                    .schedule
                                    .next_after_run(now, &mut job.remaining_timestamps);
                            }
                        }
                        tracing::warn!(scheduler = %self.config.name, job = %id, error = %err, "job run failed");
                    }
                }
            }
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.schedule_save();
    }

    async fn execute_gated(
        &self,
        job: &JobFn,
        context: JobContext,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if let Some(breaker) = &self.config.circuit_breaker {
            if !breaker.can_execute() {
                return Err(Error::CircuitOpen);
            }
        }
        if let Some(limiter) = &self.config.rate_limiter {
            limiter.acquire().await?;
        }

        let fut = job(context);
        let fut = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        scope: "job".to_string(),
                        elapsed: limit,
                    }),
                },
                None => fut.await,
            }
        };
        match &self.config.bulkhead {
            Some(bulkhead) => bulkhead.execute(fut).await?,
            None => fut.await,
        }
    }

    /// Serializable snapshot of the scheduler's observable state.
    pub async fn get_state(&self) -> SchedulerState {
        let buffer = match self.buffer.read().await {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let inner = self.inner.lock().unwrap();
        let jobs = inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .map(|job| JobState {
                id: job.id.clone(),
                schedule: job.schedule.clone(),
                next_run_at: job.next_run_at,
                last_run_at: job.last_run_at,
                remaining_timestamps: job.remaining_timestamps.clone(),
                run_once: job.run_once,
                retry_attempts: job.retry_attempts,
                runs: job.runs,
                failures: job.failures,
            })
            .collect();
        SchedulerState {
            jobs,
            stats: inner.stats,
            buffer,
        }
    }

    /// Restores a previously saved state onto the registered jobs. Running
    /// flags are cleared; jobs in the state without a registered callable
    /// are ignored.
    pub async fn restore_state(&self, state: SchedulerState) {
        self.buffer.replace(state.buffer).await;
        let mut inner = self.inner.lock().unwrap();
        inner.stats = state.stats;
        inner.queue.clear();
        for job_state in state.jobs {
            if let Some(job) = inner.jobs.get_mut(&job_state.id) {
                job.schedule = job_state.schedule;
                job.next_run_at = job_state.next_run_at;
                job.last_run_at = job_state.last_run_at;
                job.remaining_timestamps = job_state.remaining_timestamps;
                job.run_once = job_state.run_once;
                job.retry_attempts = job_state.retry_attempts;
                job.runs = job_state.runs;
                job.failures = job_state.failures;
                job.is_running = false;
                job.queued = false;
            } else {
                tracing::warn!(
                    scheduler = %self.config.name,
                    job = %job_state.id,
                    "persisted job has no registered callable; skipping"
                );
            }
        }
    }

    /// Aggregate counters.
    pub fn get_stats(&self) -> SchedulerStats {
        self.inner.lock().unwrap().stats
    }

    /// Point-in-time gauges.
    pub fn get_metrics(&self) -> SchedulerMetrics {
        let inner = self.inner.lock().unwrap();
        SchedulerMetrics {
            total_jobs: inner.jobs.len(),
            queue_depth: inner.queue.len(),
            running: self.running.load(Ordering::SeqCst),
            stats: inner.stats,
        }
    }

    /// The next scheduled run for a job, if any.
    pub fn next_run_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(id)
            .and_then(|job| job.next_run_at)
    }

    fn schedule_save(&self) {
        if self.config.persistence.is_none() {
            return;
        }
        if self.save_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.config.persistence_debounce).await;
            this.save_pending.store(false, Ordering::SeqCst);
            this.persist_now().await;
        });
    }

    async fn persist_now(&self) {
        let Some(persistence) = &self.config.persistence else {
            return;
        };
        let state = self.get_state().await;
        if let Err(err) = persistence.save_state(state).await {
            tracing::warn!(scheduler = %self.config.name, error = %err, "state save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn counting_job(counter: Arc<AtomicU32>) -> JobSpec {
        JobSpec::new(Schedule::every(Duration::from_millis(10)), move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("done"))
            }
        })
    }

    #[tokio::test]
    async fn manual_tick_runs_due_jobs() {
        let scheduler = Scheduler::with_defaults();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.add_job(counting_job(Arc::clone(&counter)).with_id("count"));

        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.get_stats().total_runs, 1);
    }

    #[tokio::test]
    async fn job_never_overlaps_itself() {
        let scheduler = Scheduler::with_defaults();
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let a = Arc::clone(&active);
        let p = Arc::clone(&peak);

        scheduler.add_job(
            JobSpec::new(Schedule::every(Duration::from_millis(1)), move |_ctx| {
                let a = Arc::clone(&a);
                let p = Arc::clone(&p);
                async move {
                    let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    a.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            })
            .with_id("slow"),
        );

        // Ticks fire far faster than the job completes.
        for _ in 0..10 {
            scheduler.tick().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_runs_retry_with_backoff() {
        let scheduler = Scheduler::with_defaults();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        scheduler.add_job(
            JobSpec::new(Schedule::every(Duration::from_secs(3600)), move |_ctx| {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::connection("flaky backend"))
                    } else {
                        Ok(json!("recovered"))
                    }
                }
            })
            .with_id("flaky")
            .with_retry(RetryPolicy {
                max_retries: 3,
                backoff: RetryBackoff::Linear,
                base_delay_ms: 10,
            }),
        );

        // First run fails, two retries fire after their back-off delays.
        for _ in 0..12 {
            scheduler.tick().await;
            tokio::time::sleep(Duration::from_millis(15)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = scheduler.get_stats();
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.total_failures, 2);
        // After success the schedule reverted to the hourly interval.
        let next = scheduler.next_run_at("flaky").unwrap();
        assert!(next > Utc::now() + ChronoDuration::minutes(30));
    }

    #[tokio::test]
    async fn timestamp_job_fires_once() {
        let scheduler = Scheduler::with_defaults();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        scheduler.add_job(
            JobSpec::new(
                Schedule::Timestamp {
                    at: Utc::now() - ChronoDuration::seconds(1),
                },
                move |_ctx| {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                },
            )
            .with_id("once"),
        );

        for _ in 0..3 {
            scheduler.tick().await;
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.next_run_at("once"), None);
    }

    #[tokio::test]
    async fn execution_timeout_fails_the_run() {
        let scheduler = Scheduler::with_defaults();
        scheduler.add_job(
            JobSpec::new(Schedule::every(Duration::from_secs(3600)), |_ctx| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!(null))
            })
            .with_id("hang")
            .with_execution_timeout(Duration::from_millis(20)),
        );

        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(scheduler.get_stats().total_failures, 1);
    }

    #[tokio::test]
    async fn queue_limit_drops_excess_jobs() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default()
                .max_parallel(1)
                .queue_limit(1),
        );
        for i in 0..4 {
            scheduler.add_job(
                JobSpec::new(Schedule::every(Duration::from_millis(1)), |_ctx| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!(null))
                })
                .with_id(format!("job-{i}")),
            );
        }

        scheduler.tick().await;
        assert!(scheduler.get_stats().dropped >= 2);
    }

    #[tokio::test]
    async fn state_round_trip_restores_observable_state() {
        let scheduler = Scheduler::with_defaults();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.add_job(counting_job(Arc::clone(&counter)).with_id("count"));
        scheduler.buffer().set("seen", json!(7)).await.unwrap();

        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = scheduler.get_state().await;

        // A fresh scheduler with the same registered job restores to the
        // same observable state.
        let restored = Scheduler::with_defaults();
        let counter2 = Arc::new(AtomicU32::new(0));
        restored.add_job(counting_job(Arc::clone(&counter2)).with_id("count"));
        restored.restore_state(state.clone()).await;

        let state2 = restored.get_state().await;
        assert_eq!(state2.jobs.len(), state.jobs.len());
        assert_eq!(state2.jobs[0].runs, state.jobs[0].runs);
        assert_eq!(state2.jobs[0].next_run_at, state.jobs[0].next_run_at);
        assert_eq!(state2.stats.total_runs, state.stats.total_runs);
        assert_eq!(state2.buffer.get("seen"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn persistence_saves_after_debounce() {
        struct MemoryPersistence {
            saved: Mutex<Option<SchedulerState>>,
        }

        #[async_trait::async_trait]
        impl SchedulerPersistence for MemoryPersistence {
            async fn save_state(&self, state: SchedulerState) -> Result<()> {
                *self.saved.lock().unwrap() = Some(state);
                Ok(())
            }

            async fn load_state(&self) -> Result<Option<SchedulerState>> {
                Ok(self.saved.lock().unwrap().clone())
            }
        }

        let persistence = Arc::new(MemoryPersistence {
            saved: Mutex::new(None),
        });
        let scheduler = Scheduler::new(
            SchedulerConfig::default()
                .persistence(Arc::clone(&persistence) as Arc<dyn SchedulerPersistence>)
                .persistence_debounce(Duration::from_millis(10)),
        );
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.add_job(counting_job(counter).with_id("count"));

        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let saved = persistence.saved.lock().unwrap().clone();
        assert!(saved.is_some());
        assert_eq!(saved.unwrap().jobs[0].id, "count");
    }

    #[tokio::test]
    async fn start_and_stop_drive_the_tick_loop() {
        let scheduler = Scheduler::new(SchedulerConfig::default().tick_interval(Duration::from_millis(50)));
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.add_job(counting_job(Arc::clone(&counter)).with_id("count"));

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;
        let after_stop = counter.load(Ordering::SeqCst);
        assert!(after_stop >= 1);

        // No more runs after stop.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }
}
