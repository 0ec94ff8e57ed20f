//! Back-off delay computation.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for growing the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategy {
    /// `base` every time.
    Fixed,
    /// `base * attempt`.
    Linear,
    /// `base * 2^(attempt - 1)`.
    Exponential,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Fixed
    }
}

/// Computes the delay after the given 1-indexed attempt.
///
/// Jitter `j > 0` multiplies the raw delay by `1 + uniform(-j, +j)`; the
/// result is clamped to be non-negative and capped at `max_allowed_wait`.
pub fn compute_delay(
    strategy: RetryStrategy,
    base: Duration,
    attempt: u32,
    jitter: f64,
    max_allowed_wait: Duration,
    rng: &mut StdRng,
) -> Duration {
    let attempt = attempt.max(1);
    let raw = match strategy {
        RetryStrategy::Fixed => base,
        RetryStrategy::Linear => base.checked_mul(attempt).unwrap_or(max_allowed_wait),
        RetryStrategy::Exponential => {
            let exponent = (attempt - 1).min(31);
            base.checked_mul(1u32 << exponent).unwrap_or(max_allowed_wait)
        }
    };

    let delayed = if jitter > 0.0 {
        let factor = 1.0 + rng.gen_range(-jitter..=jitter);
        raw.mul_f64(factor.max(0.0))
    } else {
        raw
    };

    delayed.min(max_allowed_wait)
}
