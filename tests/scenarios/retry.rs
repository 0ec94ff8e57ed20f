//! Attempt-engine scenarios: retry-until-success, analyzer rejection,
//! retry-count bounds, and trial mode.

use serde_json::json;
use stanchion_core::{MockReply, MockTransport, RequestSpec, Transport};
use stanchion_engine::{
    sync_response_analyzer, AttemptConfig, AttemptEngine, HookEnv, RetryStrategy, TrialModeConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine(replies: Vec<MockReply>) -> (AttemptEngine, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::script(replies));
    (
        AttemptEngine::new(Arc::clone(&transport) as Arc<dyn Transport>),
        transport,
    )
}

/// Two 500s then a 200: three transport calls, the final payload, and an
/// elapsed time covering both fixed back-off sleeps.
#[tokio::test]
async fn retry_then_succeed() {
    super::init_tracing();
    let (engine, transport) = engine(vec![
        MockReply::status(500),
        MockReply::status(500),
        MockReply::ok_json(json!({"status": "success"})),
    ]);
    let config = AttemptConfig::builder()
        .attempts(3)
        .wait(Duration::from_millis(100))
        .retry_strategy(RetryStrategy::Fixed)
        .return_result(true)
        .build();

    let started = Instant::now();
    let report = engine
        .execute_request(
            &RequestSpec::get("api.example.com", "/thing"),
            &config,
            &HookEnv::default(),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(report.success);
    assert_eq!(report.data, Some(json!({"status": "success"})));
    assert_eq!(transport.call_count(), 3);
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(450), "elapsed {elapsed:?}");
}

/// The response analyzer keeps retrying until the payload reports
/// completion; the transport is called exactly twice.
#[tokio::test]
async fn response_analyzer_rejects_until_completed() {
    let (engine, transport) = engine(vec![
        MockReply::ok_json(json!({"status": "processing"})),
        MockReply::ok_json(json!({"status": "completed"})),
    ]);
    let config = AttemptConfig::builder()
        .attempts(3)
        .wait(Duration::from_millis(10))
        .return_result(true)
        .response_analyzer(sync_response_analyzer(|data| {
            data["status"] == json!("completed")
        }))
        .build();

    let report = engine
        .execute_request(
            &RequestSpec::get("api.example.com", "/job/42"),
            &config,
            &HookEnv::default(),
        )
        .await;

    assert!(report.success);
    assert_eq!(report.data, Some(json!({"status": "completed"})));
    assert_eq!(transport.call_count(), 2);
}

/// Invocation count never exceeds the configured attempts.
#[tokio::test]
async fn attempt_count_is_bounded() {
    for attempts in [1u32, 2, 5] {
        let (engine, transport) = engine(vec![MockReply::status(503)]);
        let config = AttemptConfig::builder()
            .attempts(attempts)
            .wait(Duration::from_millis(1))
            .build();

        let report = engine
            .execute_request(
                &RequestSpec::get("api.example.com", "/down"),
                &config,
                &HookEnv::default(),
            )
            .await;
        assert!(!report.success);
        assert_eq!(transport.call_count(), attempts as usize);
    }
}

/// A 404 under default policy yields exactly one invocation.
#[tokio::test]
async fn non_retryable_status_is_not_retried() {
    let (engine, transport) = engine(vec![MockReply::status(404)]);
    let config = AttemptConfig::builder()
        .attempts(5)
        .wait(Duration::from_millis(1))
        .build();

    let report = engine
        .execute_request(
            &RequestSpec::get("api.example.com", "/missing"),
            &config,
            &HookEnv::default(),
        )
        .await;
    assert!(!report.success);
    assert_eq!(transport.call_count(), 1);
}

/// Trial mode with certain failure never issues a transport call; with
/// certain success it returns the sentinel payload.
#[tokio::test]
async fn trial_mode_bypasses_transport() {
    let (engine, transport) = engine(vec![MockReply::ok_json(json!("real"))]);

    let failing = AttemptConfig::builder()
        .attempts(2)
        .wait(Duration::from_millis(1))
        .trial_mode(TrialModeConfig {
            enabled: true,
            req_failure_probability: 1.0,
            retry_failure_probability: 1.0,
            seed: Some(1),
        })
        .build();
    let report = engine
        .execute_request(
            &RequestSpec::get("api.example.com", "/"),
            &failing,
            &HookEnv::default(),
        )
        .await;
    assert!(!report.success);
    assert_eq!(transport.call_count(), 0);

    let succeeding = AttemptConfig::builder()
        .return_result(true)
        .trial_mode(TrialModeConfig {
            enabled: true,
            req_failure_probability: 0.0,
            retry_failure_probability: 0.0,
            seed: None,
        })
        .build();
    let report = engine
        .execute_request(
            &RequestSpec::get("api.example.com", "/"),
            &succeeding,
            &HookEnv::default(),
        )
        .await;
    assert!(report.success);
    assert!(report.data.unwrap().get("trialMode").is_some());
    assert_eq!(transport.call_count(), 0);
}
