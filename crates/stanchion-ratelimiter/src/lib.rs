//! Fixed-window token bucket rate limiter.
//!
//! At most `max_requests` admissions happen per `window`. When the bucket is
//! empty, callers queue as FIFO waiters; a refill timer fires at
//! `last_refill + window`, resets the bucket to `max_requests`, and drains
//! waiters in arrival order. The timer is armed only while waiters exist and
//! is cancelled on [`RateLimiter::shutdown`].

use serde::Serialize;
use stanchion_core::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Counter snapshot for a rate limiter.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterMetrics {
    pub max_requests: usize,
    pub window_ms: u64,
    pub tokens: usize,
    pub queue_depth: usize,
    pub total_admitted: u64,
    pub total_queued: u64,
    pub total_rejected: u64,
}

struct State {
    tokens: usize,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
    timer: Option<tokio::task::JoinHandle<()>>,
    total_admitted: u64,
    total_queued: u64,
    total_rejected: u64,
}

/// Fixed-window token bucket with a FIFO waiter queue.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    /// Bound on how long a waiter may queue; `None` waits indefinitely.
    max_queue_wait: Option<Duration>,
    name: String,
    state: Arc<Mutex<State>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` per `window`.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::named("<unnamed>", max_requests, window)
    }

    /// Creates a named limiter (the name labels events and metrics).
    pub fn named(name: impl Into<String>, max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            max_queue_wait: None,
            name: name.into(),
            state: Arc::new(Mutex::new(State {
                tokens: max_requests.max(1),
                last_refill: Instant::now(),
                waiters: VecDeque::new(),
                timer: None,
                total_admitted: 0,
                total_queued: 0,
                total_rejected: 0,
            })),
        }
    }

    /// Bounds the queue wait; waiters that exceed it fail with
    /// [`Error::RateLimitRejected`]. Default is an unbounded wait.
    pub fn with_max_queue_wait(mut self, wait: Duration) -> Self {
        self.max_queue_wait = Some(wait);
        self
    }

    /// Acquires a token, waiting in FIFO order when the bucket is empty.
    pub async fn acquire(&self) -> Result<()> {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            self.refill_if_elapsed(&mut state);

            if state.tokens > 0 {
                state.tokens -= 1;
                state.total_admitted += 1;
                #[cfg(feature = "metrics")]
                metrics::counter!("ratelimiter_admitted_total", "ratelimiter" => self.name.clone())
                    .increment(1);
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            state.total_queued += 1;
            #[cfg(feature = "metrics")]
            metrics::counter!("ratelimiter_queued_total", "ratelimiter" => self.name.clone())
                .increment(1);
            self.arm_timer(&mut state);
            rx
        };

        let granted = match self.max_queue_wait {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(result) => result.is_ok(),
                Err(_) => {
                    let mut state = self.state.lock().unwrap();
                    state.total_rejected += 1;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(ratelimiter = %self.name, "waiter exceeded max queue wait");
                    return Err(Error::RateLimitRejected);
                }
            },
            None => receiver.await.is_ok(),
        };

        if granted {
            Ok(())
        } else {
            // The limiter was shut down while we queued.
            Err(Error::RateLimitRejected)
        }
    }

    /// Runs `fut` once a token is available.
    pub async fn execute<T>(&self, fut: impl Future<Output = T>) -> Result<T> {
        self.acquire().await?;
        Ok(fut.await)
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> RateLimiterMetrics {
        let mut state = self.state.lock().unwrap();
        self.refill_if_elapsed(&mut state);
        RateLimiterMetrics {
            max_requests: self.max_requests,
            window_ms: self.window.as_millis() as u64,
            tokens: state.tokens,
            queue_depth: state.waiters.len(),
            total_admitted: state.total_admitted,
            total_queued: state.total_queued,
            total_rejected: state.total_rejected,
        }
    }

    /// Cancels the refill timer and fails all queued waiters.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.waiters.clear();
    }

    fn refill_if_elapsed(&self, state: &mut State) {
        let now = Instant::now();
        if now.duration_since(state.last_refill) >= self.window {
            state.tokens = self.max_requests;
            state.last_refill = now;
        }
    }

    /// Arms the refill timer for `last_refill + window`. Only one timer runs
    /// at a time; it re-arms itself while waiters remain.
    fn arm_timer(&self, state: &mut State) {
        if state.timer.is_some() {
            return;
        }
        let shared = Arc::clone(&self.state);
        let max_requests = self.max_requests;
        let window = self.window;
        let deadline = state.last_refill + window;
        state.timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline.max(
                    Instant::now(),
                )))
                .await;

                let waiters_empty = {
                    let mut state = shared.lock().unwrap();
                    state.tokens = max_requests;
                    state.last_refill = Instant::now();

                    // Drain FIFO waiters; a dropped receiver gave up its place
                    // and does not consume a token.
                    while state.tokens > 0 {
                        match state.waiters.pop_front() {
                            Some(waiter) => {
                                if waiter.send(()).is_ok() {
                                    state.tokens -= 1;
                                    state.total_admitted += 1;
                                }
                            }
                            None => break,
                        }
                    }

                    if state.waiters.is_empty() {
                        state.timer = None;
                    }
                    state.waiters.is_empty()
                };

                if waiters_empty {
                    return;
                }
                // More waiters than a full window could admit: run again
                // next window.
                tokio::time::sleep(window).await;
            }
        }));
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn admits_up_to_max_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        for _ in 0..3 {
            limiter.acquire().await.unwrap();
        }
        let snapshot = limiter.metrics();
        assert_eq!(snapshot.tokens, 0);
        assert_eq!(snapshot.total_admitted, 3);
    }

    #[tokio::test]
    async fn queued_waiters_drain_after_refill() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_millis(50)));
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        let started = Instant::now();
        limiter.acquire().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn waiters_drain_in_fifo_order() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_millis(40)));
        limiter.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // Give each task time to enqueue before the next.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn window_conformance_under_load() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_millis(100)));
        let admitted_early = Arc::new(AtomicUsize::new(0));

        let started = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = Arc::clone(&limiter);
            let early = Arc::clone(&admitted_early);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                if started.elapsed() < Duration::from_millis(50) {
                    early.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Only the first window's tokens are admitted early.
        assert_eq!(admitted_early.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn bounded_queue_wait_rejects() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10))
            .with_max_queue_wait(Duration::from_millis(20));
        limiter.acquire().await.unwrap();

        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, Error::RateLimitRejected));
        assert_eq!(limiter.metrics().total_rejected, 1);
    }

    #[tokio::test]
    async fn execute_runs_future_under_token() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        let value = limiter.execute(async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
    }
}
