//! Gateway batch scenarios: order preservation, stop-on-first-error
//! markers, and racing.

use serde_json::json;
use stanchion_core::{Error, MockReply, MockTransport, RequestSpec, Transport};
use stanchion_engine::{
    AttemptConfig, ExecutionItem, Gateway, GatewayConfig, HookEnv, RACE_CANCELLED,
};
use std::sync::Arc;
use std::time::Duration;

fn gateway(replies: Vec<MockReply>) -> (Gateway, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::script(replies));
    (
        Gateway::new(Arc::clone(&transport) as Arc<dyn Transport>),
        transport,
    )
}

fn single_attempt() -> AttemptConfig {
    AttemptConfig::builder()
        .attempts(1)
        .return_result(true)
        .build()
}

/// Mixed request/function batches report in declared order even when
/// completion order inverts.
#[tokio::test]
async fn concurrent_batch_preserves_declared_order() {
    let (gateway, _) = gateway(vec![MockReply::ok_json(json!("req"))]);
    let items = vec![
        ExecutionItem::function("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(json!("slow-done"))
        }),
        ExecutionItem::request(RequestSpec::get("api.example.com", "/fast").with_id("fast")),
    ];
    let config = GatewayConfig::builder()
        .concurrent(true)
        .attempt(single_attempt())
        .build();

    let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
    assert_eq!(reports[0].id.as_deref(), Some("slow"));
    assert_eq!(reports[0].outcome.data, Some(json!("slow-done")));
    assert_eq!(reports[1].id.as_deref(), Some("fast"));
    assert_eq!(reports[1].outcome.data, Some(json!("req")));
}

/// Sequential stop-on-first-error surfaces a deterministic marker for
/// every unexecuted item.
#[tokio::test]
async fn stop_on_first_error_marks_unexecuted_items() {
    let (gateway, transport) = gateway(vec![MockReply::status(500), MockReply::ok_json(json!(2))]);
    let items: Vec<_> = (0..4)
        .map(|i| {
            ExecutionItem::request(RequestSpec::get("api.example.com", format!("/{i}")))
        })
        .collect();
    let config = GatewayConfig::builder()
        .stop_on_first_error(true)
        .attempt(single_attempt())
        .build();

    let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
    assert_eq!(reports.len(), 4);
    assert!(!reports[0].outcome.success);
    for report in &reports[1..] {
        assert!(matches!(
            report.outcome.error_kind,
            Some(Error::NotExecuted)
        ));
    }
    assert_eq!(transport.call_count(), 1);
}

/// Racing: first success wins, every loser carries the standard cancelled
/// message, and the batch returns promptly.
#[tokio::test]
async fn racing_declares_one_winner() {
    let items = vec![
        ExecutionItem::function("tortoise", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!("tortoise"))
        }),
        ExecutionItem::function("hare", |_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!("hare"))
        }),
        ExecutionItem::function("snail", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!("snail"))
        }),
    ];
    let (gateway, _) = gateway(vec![MockReply::ok_json(json!(null))]);
    let config = GatewayConfig::builder()
        .racing(true)
        .attempt(single_attempt())
        .build();

    let started = std::time::Instant::now();
    let reports = gateway.execute(&items, &config, &HookEnv::default()).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let winners: Vec<_> = reports.iter().filter(|r| r.outcome.success).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id.as_deref(), Some("hare"));
    for report in reports.iter().filter(|r| !r.outcome.success) {
        assert_eq!(report.outcome.error.as_deref(), Some(RACE_CANCELLED));
    }
}
