//! Scheduler data model: schedules, job specs, retry policy, and the
//! serializable state used for persistence and restore.

use crate::cron::CronExpression;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stanchion_buffer::StableBuffer;
use stanchion_core::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// When a job should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Schedule {
    /// Every `every_ms`, first at `start_at` (when future) else immediately.
    Interval {
        every_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_at: Option<DateTime<Utc>>,
    },
    /// Cron expression, optionally evaluated in an IANA timezone.
    Cron {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Fires once at `at`.
    Timestamp { at: DateTime<Utc> },
    /// Fires once per listed instant, earliest first.
    Timestamps { at: Vec<DateTime<Utc>> },
}

impl Schedule {
    /// Convenience constructor for an interval schedule.
    pub fn every(every: Duration) -> Self {
        Schedule::Interval {
            every_ms: every.as_millis() as u64,
            start_at: None,
        }
    }

    /// Convenience constructor for a cron schedule.
    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            expression: expression.into(),
            timezone: None,
        }
    }

    /// True when the schedule fires a bounded number of times.
    pub fn run_once(&self) -> bool {
        matches!(self, Schedule::Timestamp { .. } | Schedule::Timestamps { .. })
    }

    fn parsed_cron(&self) -> Option<(CronExpression, Option<chrono_tz::Tz>)> {
        let Schedule::Cron {
            expression,
            timezone,
        } = self
        else {
            return None;
        };
        let cron = CronExpression::parse(expression)?;
        let tz = match timezone {
            Some(name) => Some(name.parse().ok()?),
            None => None,
        };
        Some((cron, tz))
    }

    /// The first fire time. `None` disables the job (invalid cron, no
    /// timestamps).
    pub(crate) fn initial_next_run(
        &self,
        now: DateTime<Utc>,
        remaining: &mut Vec<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Interval { start_at, .. } => match start_at {
                Some(at) if *at > now => Some(*at),
                _ => Some(now),
            },
            Schedule::Cron { .. } => self.parsed_cron().and_then(|(cron, tz)| cron.next_fire(now, tz)),
            Schedule::Timestamp { at } => Some(*at),
            Schedule::Timestamps { at } => {
                *remaining = at.clone();
                remaining.sort();
                remaining.first().copied()
            }
        }
    }

    /// The fire time after a completed run. Consumes a timestamp for
    /// timestamp-list schedules.
    pub(crate) fn next_after_run(
        &self,
        last_run: DateTime<Utc>,
        remaining: &mut Vec<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Interval { every_ms, .. } => {
                Some(last_run + ChronoDuration::milliseconds(*every_ms as i64))
            }
            Schedule::Cron { .. } => self
                .parsed_cron()
                .and_then(|(cron, tz)| cron.next_fire(last_run, tz)),
            Schedule::Timestamp { .. } => None,
            Schedule::Timestamps { .. } => {
                if !remaining.is_empty() {
                    remaining.remove(0);
                }
                remaining.first().copied()
            }
        }
    }
}

/// Back-off growth for job retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryBackoff {
    Linear,
    Exponential,
}

/// Retry policy applied to failed job runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: RetryBackoff,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// The delay before the given retry attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = Duration::from_millis(self.base_delay_ms);
        match self.backoff {
            RetryBackoff::Linear => base.checked_mul(attempt).unwrap_or(base),
            RetryBackoff::Exponential => base
                .checked_mul(1u32 << (attempt - 1).min(31))
                .unwrap_or(base),
        }
    }
}

/// Context handed to a job callable on each run.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,
    pub run_number: u64,
    /// Shared scheduler buffer; jobs mutate it through transactions.
    pub buffer: Arc<StableBuffer>,
    pub transaction_logs: Option<Vec<Value>>,
}

/// The callable behind a scheduled job.
pub type JobFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A job registration.
#[derive(Clone)]
pub struct JobSpec {
    pub id: Option<String>,
    pub schedule: Schedule,
    pub job: JobFn,
    pub retry: Option<RetryPolicy>,
    pub execution_timeout: Option<Duration>,
}

impl JobSpec {
    /// Wraps an async closure as a job.
    pub fn new<F, Fut>(schedule: Schedule, job: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            id: None,
            schedule,
            job: Arc::new(move |ctx| Box::pin(job(ctx))),
            retry: None,
            execution_timeout: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }
}

/// Serializable snapshot of one job's schedule state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub id: String,
    pub schedule: Schedule,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remaining_timestamps: Vec<DateTime<Utc>>,
    pub run_once: bool,
    pub retry_attempts: u32,
    pub runs: u64,
    pub failures: u64,
}

/// Aggregate scheduler counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub total_runs: u64,
    pub total_failures: u64,
    pub total_retries: u64,
    pub dropped: u64,
}

/// Serializable scheduler state, restorable across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerState {
    pub jobs: Vec<JobState>,
    pub stats: SchedulerStats,
    /// Contents of the shared buffer.
    pub buffer: Map<String, Value>,
}

/// Adapter persisting scheduler state across restarts.
#[async_trait]
pub trait SchedulerPersistence: Send + Sync {
    async fn save_state(&self, state: SchedulerState) -> Result<()>;
    async fn load_state(&self) -> Result<Option<SchedulerState>>;
}
