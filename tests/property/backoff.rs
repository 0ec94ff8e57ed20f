//! Back-off delay invariants.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stanchion_engine::{compute_delay, RetryStrategy};
use std::time::Duration;

fn strategy() -> impl Strategy<Value = RetryStrategy> {
    prop_oneof![
        Just(RetryStrategy::Fixed),
        Just(RetryStrategy::Linear),
        Just(RetryStrategy::Exponential),
    ]
}

proptest! {
    /// With zero jitter, delays follow the strategy formula exactly
    /// (capped at the allowed maximum).
    #[test]
    fn zero_jitter_follows_formula(
        strategy in strategy(),
        base_ms in 1u64..1000,
        attempt in 1u32..12,
    ) {
        let mut rng = StdRng::seed_from_u64(0);
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_secs(3600);
        let delay = compute_delay(strategy, base, attempt, 0.0, max, &mut rng);

        let expected = match strategy {
            RetryStrategy::Fixed => base,
            RetryStrategy::Linear => base * attempt,
            RetryStrategy::Exponential => base * 2u32.pow(attempt - 1),
        };
        prop_assert_eq!(delay, expected.min(max));
    }

    /// With jitter j, every delay lies within [raw * (1 - j), raw * (1 + j)].
    #[test]
    fn jitter_stays_in_band(
        strategy in strategy(),
        base_ms in 1u64..500,
        attempt in 1u32..8,
        jitter in 0.01f64..1.0,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_secs(86_400);
        let delay = compute_delay(strategy, base, attempt, jitter, max, &mut rng);

        let raw = match strategy {
            RetryStrategy::Fixed => base,
            RetryStrategy::Linear => base * attempt,
            RetryStrategy::Exponential => base * 2u32.pow(attempt - 1),
        };
        let lo = raw.mul_f64((1.0 - jitter).max(0.0));
        let hi = raw.mul_f64(1.0 + jitter).min(max);
        prop_assert!(delay >= lo, "delay {:?} below band start {:?}", delay, lo);
        prop_assert!(delay <= hi, "delay {:?} above band end {:?}", delay, hi);
    }

    /// The cap always bounds the result.
    #[test]
    fn cap_is_respected(
        strategy in strategy(),
        base_ms in 1u64..10_000,
        attempt in 1u32..20,
        cap_ms in 1u64..5000,
    ) {
        let mut rng = StdRng::seed_from_u64(1);
        let delay = compute_delay(
            strategy,
            Duration::from_millis(base_ms),
            attempt,
            0.0,
            Duration::from_millis(cap_ms),
            &mut rng,
        );
        prop_assert!(delay <= Duration::from_millis(cap_ms));
    }
}
