//! Gateway executor: batches of items driven through the attempt engine
//! under shared resilience gates.
//!
//! Four dispatch modes, all preserving declared item order in the output:
//! sequential, concurrent (all-settled), concurrent with stop-on-first-error
//! (launches cease as soon as a completed item reports failure), and racing
//! (first success wins, losers are cancelled).

use crate::config::{AttemptConfig, AttemptOverrides};
use crate::engine::{AttemptEngine, AttemptReport, HookEnv};
use crate::item::ExecutionItem;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use stanchion_bulkhead::Bulkhead;
use stanchion_circuitbreaker::CircuitBreaker;
use stanchion_core::Transport;
use stanchion_ratelimiter::RateLimiter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Message attached to racing losers.
pub const RACE_CANCELLED: &str = "Cancelled - another request/function won the race";

/// Which kind of item a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Request,
    Function,
}

/// Per-item result, in declared order.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub index: usize,
    pub id: Option<String>,
    pub kind: ItemKind,
    pub outcome: AttemptReport,
}

impl ItemReport {
    fn new(index: usize, item: &ExecutionItem, outcome: AttemptReport) -> Self {
        Self {
            index,
            id: item.id().map(str::to_string),
            kind: if item.is_request() {
                ItemKind::Request
            } else {
                ItemKind::Function
            },
            outcome,
        }
    }
}

/// Aggregate counters over one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub from_cache: usize,
}

fn config_for(
    base: &AttemptConfig,
    overrides: &[Option<AttemptOverrides>],
    index: usize,
) -> AttemptConfig {
    let mut config = base.clone();
    if let Some(Some(over)) = overrides.get(index) {
        over.apply_to(&mut config);
    }
    config
}

/// Summarizes a batch of item reports.
pub fn summarize(reports: &[ItemReport]) -> BatchSummary {
    let successful = reports.iter().filter(|r| r.outcome.success).count();
    let from_cache = reports.iter().filter(|r| r.outcome.from_cache).count();
    BatchSummary {
        total: reports.len(),
        successful,
        failed: reports.len() - successful,
        from_cache,
    }
}

/// Configuration for one gateway batch.
#[derive(Clone, Default)]
pub struct GatewayConfig {
    pub(crate) concurrent_execution: bool,
    pub(crate) stop_on_first_error: bool,
    pub(crate) enable_racing: bool,
    pub(crate) max_concurrent: Option<usize>,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) attempt: AttemptConfig,
    /// Sparse per-item option overlays, indexed by item position. Item keys
    /// beat the batch-level attempt configuration.
    pub(crate) item_overrides: Vec<Option<AttemptOverrides>>,
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Fan items out instead of running them in index order.
    pub fn concurrent(mut self, enabled: bool) -> Self {
        self.config.concurrent_execution = enabled;
        self
    }

    /// Stop the batch as soon as one item fails; later items get a
    /// deterministic not-executed marker.
    pub fn stop_on_first_error(mut self, enabled: bool) -> Self {
        self.config.stop_on_first_error = enabled;
        self
    }

    /// Race all items; the first success wins and losers are cancelled.
    pub fn racing(mut self, enabled: bool) -> Self {
        self.config.enable_racing = enabled;
        self
    }

    /// Concurrency cap applied to this batch via a dedicated bulkhead.
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = Some(n);
        self
    }

    /// Rate limiter shared by the batch's attempts.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.config.rate_limiter = Some(limiter);
        self
    }

    /// Circuit breaker shared by the batch's attempts.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.config.circuit_breaker = Some(breaker);
        self
    }

    /// Base attempt configuration applied to every item.
    pub fn attempt(mut self, config: AttemptConfig) -> Self {
        self.config.attempt = config;
        self
    }

    /// Per-item option overlays, positionally aligned with the item list.
    pub fn item_overrides(mut self, overrides: Vec<Option<AttemptOverrides>>) -> Self {
        self.config.item_overrides = overrides;
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

/// Executes batches of execution items.
#[derive(Clone)]
pub struct Gateway {
    engine: AttemptEngine,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            engine: AttemptEngine::new(transport),
        }
    }

    pub fn from_engine(engine: AttemptEngine) -> Self {
        Self { engine }
    }

    /// The underlying attempt engine.
    pub fn engine(&self) -> &AttemptEngine {
        &self.engine
    }

    /// Executes a batch, returning one report per item in declared order.
    pub async fn execute(
        &self,
        items: &[ExecutionItem],
        config: &GatewayConfig,
        env: &HookEnv,
    ) -> Vec<ItemReport> {
        if items.is_empty() {
            return Vec::new();
        }

        let mut attempt = config.attempt.clone();
        if let Some(limiter) = &config.rate_limiter {
            attempt.rate_limiter = Some(Arc::clone(limiter));
        }
        if let Some(breaker) = &config.circuit_breaker {
            attempt.circuit_breaker = Some(Arc::clone(breaker));
        }
        if let Some(limit) = config.max_concurrent {
            attempt.bulkhead = Some(Arc::new(Bulkhead::named("gateway-batch", limit)));
        }

        let overrides = &config.item_overrides;
        if config.enable_racing {
            self.race(items, &attempt, overrides, env).await
        } else if config.concurrent_execution && config.stop_on_first_error {
            self.concurrent_stop_on_first_error(items, &attempt, overrides, env)
                .await
        } else if config.concurrent_execution {
            self.concurrent_all_settled(items, &attempt, overrides, env).await
        } else {
            self.sequential(items, config.stop_on_first_error, &attempt, overrides, env)
                .await
        }
    }

    async fn sequential(
        &self,
        items: &[ExecutionItem],
        stop_on_first_error: bool,
        attempt: &AttemptConfig,
        overrides: &[Option<AttemptOverrides>],
        env: &HookEnv,
    ) -> Vec<ItemReport> {
        let mut reports = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let item_config = config_for(attempt, overrides, index);
            let outcome = self.engine.execute_item(item, &item_config, env).await;
            let failed = !outcome.success;
            reports.push(ItemReport::new(index, item, outcome));

            if failed && stop_on_first_error {
                tracing::debug!(index, "stopping batch on first error");
                for (rest_index, rest_item) in items.iter().enumerate().skip(index + 1) {
                    reports.push(ItemReport::new(
                        rest_index,
                        rest_item,
                        AttemptReport::not_executed(),
                    ));
                }
                break;
            }
        }
        reports
    }

    async fn concurrent_all_settled(
        &self,
        items: &[ExecutionItem],
        attempt: &AttemptConfig,
        overrides: &[Option<AttemptOverrides>],
        env: &HookEnv,
    ) -> Vec<ItemReport> {
        let futures = items.iter().enumerate().map(|(index, item)| {
            let engine = self.engine.clone();
            let item_config = config_for(attempt, overrides, index);
            let env = env.clone();
            async move { (index, engine.execute_item(item, &item_config, &env).await) }
        });

        let mut slots: Vec<Option<AttemptReport>> = (0..items.len()).map(|_| None).collect();
        for (index, outcome) in join_all(futures).await {
            slots[index] = Some(outcome);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                ItemReport::new(
                    index,
                    &items[index],
                    outcome.unwrap_or_else(AttemptReport::not_executed),
                )
            })
            .collect()
    }

    /// Concurrent mode that ceases further launches as soon as any completed
    /// item is unsuccessful. Launches are staggered one poll apart so the
    /// batch stays cooperative.
    async fn concurrent_stop_on_first_error(
        &self,
        items: &[ExecutionItem],
        attempt: &AttemptConfig,
        overrides: &[Option<AttemptOverrides>],
        env: &HookEnv,
    ) -> Vec<ItemReport> {
        let total = items.len();
        let mut slots: Vec<Option<AttemptReport>> = (0..total).map(|_| None).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut next = 0usize;
        let mut stop = false;

        while !in_flight.is_empty() || (!stop && next < total) {
            tokio::select! {
                biased;
                Some((index, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    let outcome: AttemptReport = outcome;
                    if !outcome.success {
                        stop = true;
                    }
                    slots[index] = Some(outcome);
                }
                _ = std::future::ready(()), if !stop && next < total => {
                    let engine = self.engine.clone();
                    let item = items[next].clone();
                    let item_config = config_for(attempt, overrides, next);
                    let env = env.clone();
                    let index = next;
                    in_flight.push(async move {
                        (index, engine.execute_item(&item, &item_config, &env).await)
                    });
                    next += 1;
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                ItemReport::new(
                    index,
                    &items[index],
                    outcome.unwrap_or_else(AttemptReport::not_executed),
                )
            })
            .collect()
    }

    async fn race(
        &self,
        items: &[ExecutionItem],
        attempt: &AttemptConfig,
        overrides: &[Option<AttemptOverrides>],
        env: &HookEnv,
    ) -> Vec<ItemReport> {
        let total = items.len();
        let group = CancellationToken::new();
        let mut in_flight = FuturesUnordered::new();

        for (index, item) in items.iter().enumerate() {
            let child = group.child_token();
            let item = item.clone().with_cancel(child.clone());
            let engine = self.engine.clone();
            let item_config = config_for(attempt, overrides, index);
            let env = env.clone();
            in_flight.push(async move {
                tokio::select! {
                    outcome = engine.execute_item(&item, &item_config, &env) => (index, Some(outcome)),
                    _ = child.cancelled() => (index, None),
                }
            });
        }

        let mut winner: Option<usize> = None;
        let mut slots: Vec<Option<AttemptReport>> = (0..total).map(|_| None).collect();
        while let Some((index, outcome)) = in_flight.next().await {
            if let Some(outcome) = outcome {
                if outcome.success && winner.is_none() {
                    winner = Some(index);
                    group.cancel();
                }
                slots[index] = Some(outcome);
            }
        }

        match winner {
            Some(winning_index) => (0..total)
                .map(|index| {
                    let outcome = if index == winning_index {
                        slots[index].take().expect("winner outcome recorded")
                    } else {
                        AttemptReport::cancelled(RACE_CANCELLED)
                    };
                    ItemReport::new(index, &items[index], outcome)
                })
                .collect(),
            None => slots
                .into_iter()
                .enumerate()
                .map(|(index, outcome)| {
                    ItemReport::new(
                        index,
                        &items[index],
                        outcome.unwrap_or_else(|| AttemptReport::cancelled(RACE_CANCELLED)),
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stanchion_core::{Error, MockReply, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn gateway_with(replies: Vec<MockReply>) -> (Gateway, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::script(replies));
        (
            Gateway::new(Arc::clone(&transport) as Arc<dyn Transport>),
            transport,
        )
    }

    fn one_shot_config() -> AttemptConfig {
        AttemptConfig::builder()
            .attempts(1)
            .return_result(true)
            .build()
    }

    #[tokio::test]
    async fn sequential_preserves_order() {
        let (gateway, _) = gateway_with(vec![
            MockReply::ok_json(json!(1)),
            MockReply::ok_json(json!(2)),
        ]);
        let items = vec![
            ExecutionItem::request(stanchion_core::RequestSpec::get("a.example.com", "/1")),
            ExecutionItem::request(stanchion_core::RequestSpec::get("a.example.com", "/2")),
        ];
        let config = GatewayConfig::builder().attempt(one_shot_config()).build();

        let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].outcome.data, Some(json!(1)));
        assert_eq!(reports[1].outcome.data, Some(json!(2)));
    }

    #[tokio::test]
    async fn sequential_stop_on_first_error_marks_rest() {
        let (gateway, transport) = gateway_with(vec![
            MockReply::ok_json(json!(1)),
            MockReply::status(500),
            MockReply::ok_json(json!(3)),
        ]);
        let items: Vec<_> = (0..3)
            .map(|i| {
                ExecutionItem::request(stanchion_core::RequestSpec::get(
                    "a.example.com",
                    format!("/{i}"),
                ))
            })
            .collect();
        let config = GatewayConfig::builder()
            .stop_on_first_error(true)
            .attempt(one_shot_config())
            .build();

        let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
        assert!(reports[0].outcome.success);
        assert!(!reports[1].outcome.success);
        assert!(matches!(
            reports[2].outcome.error_kind,
            Some(Error::NotExecuted)
        ));
        // Only two dispatches happened.
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_results_keep_declared_order() {
        let (gateway, _) = gateway_with(vec![MockReply::ok_json(json!("x"))]);
        let slow = ExecutionItem::function("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(json!("slow"))
        });
        let fast = ExecutionItem::function("fast", |_| async { Ok(json!("fast")) });
        let config = GatewayConfig::builder()
            .concurrent(true)
            .attempt(one_shot_config())
            .build();

        let reports = gateway
            .execute(&[slow, fast], &config, &HookEnv::default())
            .await;
        assert_eq!(reports[0].id.as_deref(), Some("slow"));
        assert_eq!(reports[0].outcome.data, Some(json!("slow")));
        assert_eq!(reports[1].outcome.data, Some(json!("fast")));
    }

    #[tokio::test]
    async fn concurrent_stop_on_first_error_ceases_launches() {
        let launched = Arc::new(AtomicUsize::new(0));

        let mut items = Vec::new();
        // Item 0 fails quickly; the rest take long enough that launches
        // should cease before all ten start.
        for i in 0..10 {
            let launched = Arc::clone(&launched);
            items.push(ExecutionItem::function(format!("fn-{i}"), move |_| {
                let launched = Arc::clone(&launched);
                async move {
                    launched.fetch_add(1, Ordering::SeqCst);
                    if i == 0 {
                        Err(Error::from_status(400, "bad request"))
                    } else {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!(i))
                    }
                }
            }));
        }

        let (gateway, _) = gateway_with(vec![MockReply::ok_json(json!(null))]);
        let config = GatewayConfig::builder()
            .concurrent(true)
            .stop_on_first_error(true)
            .attempt(one_shot_config())
            .build();

        let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
        assert_eq!(reports.len(), 10);
        assert!(!reports[0].outcome.success);
        let not_executed = reports
            .iter()
            .filter(|r| matches!(r.outcome.error_kind, Some(Error::NotExecuted)))
            .count();
        assert!(
            not_executed >= 1,
            "expected suppressed launches, got launched={}",
            launched.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn racing_first_success_wins_and_losers_cancel() {
        let fast = ExecutionItem::function("fast", |_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(json!("winner"))
        });
        let slow = ExecutionItem::function("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("too late"))
        });

        let (gateway, _) = gateway_with(vec![MockReply::ok_json(json!(null))]);
        let config = GatewayConfig::builder()
            .racing(true)
            .attempt(one_shot_config())
            .build();

        let started = std::time::Instant::now();
        let reports = gateway
            .execute(&[slow, fast], &config, &HookEnv::default())
            .await;
        // The slow loser returned promptly via its abort handle.
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(!reports[0].outcome.success);
        assert_eq!(reports[0].outcome.error.as_deref(), Some(RACE_CANCELLED));
        assert!(reports[1].outcome.success);
        assert_eq!(reports[1].outcome.data, Some(json!("winner")));
    }

    #[tokio::test]
    async fn racing_with_no_winner_surfaces_failures() {
        let a = ExecutionItem::function("a", |_| async {
            Err(Error::from_status(500, "a failed"))
        });
        let b = ExecutionItem::function("b", |_| async {
            Err(Error::from_status(503, "b failed"))
        });

        let (gateway, _) = gateway_with(vec![MockReply::ok_json(json!(null))]);
        let config = GatewayConfig::builder()
            .racing(true)
            .attempt(one_shot_config())
            .build();

        let reports = gateway.execute(&[a, b], &config, &HookEnv::default()).await;
        assert!(reports.iter().all(|r| !r.outcome.success));
        assert!(reports.iter().all(|r| r.outcome.error.is_some()));
    }

    #[tokio::test]
    async fn circuit_open_reports_are_distinguishable() {
        use stanchion_circuitbreaker::CircuitBreakerConfig;

        let breaker = Arc::new(
            CircuitBreakerConfig::builder()
                .minimum_requests(1)
                .failure_threshold_pct(1.0)
                .recovery_timeout(Duration::from_secs(60))
                .build(),
        );
        breaker.record_failure();

        let (gateway, _) = gateway_with(vec![MockReply::ok_json(json!(1))]);
        let items = vec![ExecutionItem::request(stanchion_core::RequestSpec::get(
            "a.example.com",
            "/",
        ))];
        let config = GatewayConfig::builder()
            .circuit_breaker(breaker)
            .attempt(one_shot_config())
            .build();

        let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
        assert!(reports[0].outcome.is_circuit_open());
        assert!(reports[0]
            .outcome
            .error
            .as_deref()
            .unwrap()
            .starts_with("circuit breaker is open"));
    }

    #[tokio::test]
    async fn batch_summary_counts() {
        let (gateway, _) = gateway_with(vec![
            MockReply::ok_json(json!(1)),
            MockReply::status(404),
        ]);
        let items = vec![
            ExecutionItem::request(stanchion_core::RequestSpec::get("a.example.com", "/ok")),
            ExecutionItem::request(stanchion_core::RequestSpec::get("a.example.com", "/no")),
        ];
        let config = GatewayConfig::builder().attempt(one_shot_config()).build();

        let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
        let summary = summarize(&reports);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
    }
}
