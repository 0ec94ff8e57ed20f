//! Rate-limit and concurrency-limit conformance scenarios.

use serde_json::json;
use stanchion_bulkhead::Bulkhead;
use stanchion_core::Result;
use stanchion_ratelimiter::RateLimiter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ten 30ms tasks through a limit of 3: observed concurrency stays within
/// (2, 3] and the batch takes at least ceil(10/3) waves.
#[tokio::test]
async fn bulkhead_bounds_observed_concurrency() {
    let bulkhead = Arc::new(Bulkhead::new(3));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let bulkhead = Arc::clone(&bulkhead);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            bulkhead
                .execute(async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let elapsed = started.elapsed();

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak}");
    assert!(peak >= 2, "peak concurrency {peak}");
    // ceil(10 / 3) = 4 waves of ~30ms.
    assert!(elapsed >= Duration::from_millis(110), "elapsed {elapsed:?}");
}

/// Six concurrent acquisitions against 3-per-second: the first window
/// admits three within 50ms, the rest wait for the refill.
#[tokio::test]
async fn rate_limiter_window_conformance() {
    let limiter = Arc::new(RateLimiter::new(3, Duration::from_millis(1000)));
    let started = Instant::now();
    let early = Arc::new(AtomicUsize::new(0));
    let late_start = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let limiter = Arc::clone(&limiter);
        let early = Arc::clone(&early);
        let late_start = Arc::clone(&late_start);
        handles.push(tokio::spawn(async move {
            limiter.acquire().await.unwrap();
            let at = started.elapsed();
            if at < Duration::from_millis(50) {
                early.fetch_add(1, Ordering::SeqCst);
            } else {
                late_start.lock().unwrap().push(at);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(early.load(Ordering::SeqCst), 3);
    let late = late_start.lock().unwrap();
    assert_eq!(late.len(), 3);
    for at in late.iter() {
        assert!(*at >= Duration::from_millis(950), "late admission at {at:?}");
    }
}

/// Errors inside a limited execution never wedge the slot.
#[tokio::test]
async fn limits_release_on_error() {
    let bulkhead = Bulkhead::new(1);
    for _ in 0..5 {
        let out: Result<std::result::Result<serde_json::Value, &str>> =
            bulkhead.execute(async { Err("always fails") }).await;
        assert!(out.unwrap().is_err());
    }
    assert_eq!(bulkhead.metrics().running, 0);
    assert_eq!(bulkhead.metrics().total_completed, 5);

    let limiter = RateLimiter::new(2, Duration::from_millis(50));
    for _ in 0..6 {
        let _ = limiter
            .execute(async { json!("each call settles") })
            .await
            .unwrap();
    }
    assert_eq!(limiter.metrics().total_admitted, 6);
}
