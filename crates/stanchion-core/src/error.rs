//! Error model shared by every stanchion crate.
//!
//! A single enum covers all error kinds so the composite layers (gateway,
//! workflow, scheduler) can classify outcomes without downcasting: circuit
//! rejections short-circuit retry loops, transport errors carry their own
//! retryability, and content rejections are always retryable.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced anywhere in the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Invalid configuration, including out-of-range trial probabilities.
    #[error("validation error: {0}")]
    Validation(String),

    /// A network or HTTP failure from the transport.
    #[error("transport error: {message}")]
    Transport {
        /// HTTP status code, when the failure carried one.
        status_code: Option<u16>,
        /// Whether another attempt may succeed.
        retryable: bool,
        /// Human-readable description.
        message: String,
    },

    /// The response analyzer rejected a syntactically valid response.
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// The circuit breaker is open; the call was not permitted.
    #[error("circuit breaker is open; call not permitted")]
    CircuitOpen,

    /// A bounded rate-limiter queue wait elapsed before a token arrived.
    #[error("rate limit exceeded: queue wait elapsed")]
    RateLimitRejected,

    /// A timeout elapsed (request, transaction, job, or workflow scope).
    #[error("{scope} timed out after {elapsed:?}")]
    Timeout {
        /// What timed out ("request", "transaction", "job", "workflow").
        scope: String,
        /// The configured limit that elapsed.
        elapsed: Duration,
    },

    /// A non-linear decision named a phase that does not exist.
    #[error("phase not found: {0}")]
    PhaseNotFound(String),

    /// Graph construction failed validation.
    #[error("graph validation failed: {0}")]
    GraphValidation(String),

    /// A user hook failed.
    #[error("hook error: {0}")]
    Hook(String),

    /// The work was cancelled, e.g. a racing loser or an aborted workflow.
    #[error("{0}")]
    Cancelled(String),

    /// The item was never executed because an earlier item failed.
    #[error("not executed: a previous item failed with stop-on-first-error enabled")]
    NotExecuted,
}

impl Error {
    /// Builds a transport error from an HTTP status code, classifying
    /// retryability per policy: 408, 429 and 5xx retry; other 4xx do not.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Error::Transport {
            status_code: Some(status),
            retryable: status_is_retryable(status),
            message: message.into(),
        }
    }

    /// Builds a retryable connection-level transport error (no status).
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Transport {
            status_code: None,
            retryable: true,
            message: message.into(),
        }
    }

    /// Whether another attempt is permitted for this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { retryable, .. } => *retryable,
            Error::InvalidContent(_) => true,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }

    /// True if this error is the circuit-open short circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen)
    }

    /// The HTTP status code, when one applies.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

/// HTTP status retryability: transport-level 408/429 plus all 5xx.
pub fn status_is_retryable(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}
