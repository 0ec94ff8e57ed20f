//! Attempt outcomes and per-attempt log records.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// The result of a single attempt of the underlying callable.
///
/// `ok == false && retryable == false` is fatal (caller error); `ok == false
/// && retryable == true` schedules a retry; `ok == true` is provisionally
/// good, subject to the caller's response analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub ok: bool,
    pub retryable: bool,
    pub status_code: Option<u16>,
    pub execution_time: Duration,
    pub timestamp: DateTime<Utc>,
    pub data: Option<Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
}

impl AttemptOutcome {
    /// A successful attempt carrying its payload.
    pub fn success(data: Value, status_code: Option<u16>, execution_time: Duration) -> Self {
        Self {
            ok: true,
            retryable: false,
            status_code,
            execution_time,
            timestamp: Utc::now(),
            data: Some(data),
            error: None,
            from_cache: false,
        }
    }

    /// A successful attempt served from the response cache.
    pub fn from_cache(data: Value, status_code: Option<u16>) -> Self {
        Self {
            from_cache: true,
            ..Self::success(data, status_code, Duration::ZERO)
        }
    }

    /// A failed attempt; retryability is taken from the error.
    pub fn failure(error: &Error, execution_time: Duration) -> Self {
        Self {
            ok: false,
            retryable: error.is_retryable(),
            status_code: error.status_code(),
            execution_time,
            timestamp: Utc::now(),
            data: None,
            error: Some(error.to_string()),
            from_cache: false,
        }
    }

    /// True when no further attempt is permitted for this outcome.
    pub fn is_fatal(&self) -> bool {
        !self.ok && !self.retryable
    }
}

/// One entry in an attempt report's error or success log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLog {
    /// 1-indexed attempt number.
    pub attempt: u32,
    /// Epoch milliseconds of the attempt completion.
    pub timestamp_ms: i64,
    pub execution_time_ms: u64,
    pub status_code: Option<u16>,
    pub message: String,
    /// True when the response analyzer rejected an otherwise-ok response.
    #[serde(default)]
    pub analyzer_rejected: bool,
}

impl AttemptLog {
    /// Builds a log record from an outcome.
    pub fn from_outcome(attempt: u32, outcome: &AttemptOutcome, analyzer_rejected: bool) -> Self {
        let message = if analyzer_rejected {
            "response analyzer rejected the payload".to_string()
        } else {
            outcome
                .error
                .clone()
                .unwrap_or_else(|| "attempt succeeded".to_string())
        };
        Self {
            attempt,
            timestamp_ms: outcome.timestamp.timestamp_millis(),
            execution_time_ms: outcome.execution_time.as_millis() as u64,
            status_code: outcome.status_code,
            message,
            analyzer_rejected,
        }
    }
}
