//! Workflow scenarios: stop-on-phase-error accounting, the JUMP decision,
//! iteration caps, and branch walking.

use serde_json::json;
use stanchion_core::{MockReply, MockTransport, RequestSpec, Transport};
use stanchion_engine::{AttemptConfig, ExecutionItem, Gateway};
use stanchion_workflow::{
    branch_decision_hook, sync_phase_decision_hook, Branch, BranchWalker, Decision,
    DecisionOutcome, Phase, WorkflowConfig, WorkflowController,
};
use std::sync::Arc;
use std::time::Duration;

fn controller_with(replies: Vec<MockReply>) -> (WorkflowController, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::script(replies));
    (
        WorkflowController::new(Gateway::new(Arc::clone(&transport) as Arc<dyn Transport>)),
        transport,
    )
}

fn phase(id: &str) -> Phase {
    Phase::new(
        id,
        [ExecutionItem::request(RequestSpec::get(
            "api.example.com",
            format!("/{id}"),
        ))],
    )
}

fn config(id: &str) -> WorkflowConfig {
    WorkflowConfig::new(id).attempt(AttemptConfig::builder().attempts(1).build())
}

/// Three phases where phase two's lone request fails: the walk stops with
/// two completed phases and one request on each side of the ledger.
#[tokio::test]
async fn sequential_workflow_stops_on_phase_error() {
    super::init_tracing();
    let (controller, transport) = controller_with(vec![
        MockReply::ok_json(json!(1)),
        MockReply::status(500),
        MockReply::ok_json(json!(3)),
    ]);
    let report = controller
        .run(
            vec![phase("extract"), phase("transform"), phase("load")],
            &config("etl").stop_on_phase_error(true),
        )
        .await;

    assert!(!report.success);
    assert_eq!(report.total_phases, 3);
    assert_eq!(report.completed_phases, 2);
    assert_eq!(report.metrics.successful_requests, 1);
    assert_eq!(report.metrics.failed_requests, 1);
    // The third phase never dispatched.
    assert_eq!(transport.call_count(), 2);
}

/// A JUMP decision from phase A to phase C leaves B unexecuted and the
/// workflow successful.
#[tokio::test]
async fn non_linear_jump_skips_ahead() {
    let (controller, _) = controller_with(vec![MockReply::ok_json(json!("ok"))]);
    let a = phase("A").decision_hook(sync_phase_decision_hook(|_| Decision::Jump {
        target_id: "C".to_string(),
    }));
    let report = controller
        .run(vec![a, phase("B"), phase("C")], &config("jump"))
        .await;

    assert!(report.success);
    assert_eq!(report.execution_order, vec!["A", "C"]);
    assert!(!report.execution_order.contains(&"B".to_string()));
}

/// The iteration guard bounds decision evaluations.
#[tokio::test]
async fn iteration_cap_bounds_decisions() {
    let (controller, _) = controller_with(vec![MockReply::ok_json(json!("ok"))]);
    let looper = phase("loop").decision_hook(sync_phase_decision_hook(|_| Decision::Replay));
    let report = controller
        .run(
            vec![looper],
            &config("capped").max_workflow_iterations(7),
        )
        .await;

    assert!(report.terminated_early);
    assert_eq!(report.execution_order.len(), 7);
}

/// Branches share one buffer; a decision hook reads what an earlier branch
/// wrote.
#[tokio::test]
async fn branches_share_state_through_the_buffer() {
    let transport = Arc::new(MockTransport::always_ok(json!("ok")));
    let walker = BranchWalker::new(WorkflowController::new(Gateway::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
    )));

    let writer = Branch::new(
        "writer",
        vec![Phase::new(
            "write",
            [ExecutionItem::function("write-fn", |_| async {
                Ok(json!({"wrote": true}))
            })],
        )],
    )
    .decision_hook(branch_decision_hook(|ctx| async move {
        // Nothing wrote to the buffer yet; decide based on the branch run.
        assert!(ctx.branch_result.success);
        Ok(DecisionOutcome::decision(Decision::Continue))
    }));

    let reader = Branch::new("reader", vec![phase("read")]);
    let report = walker
        .run(vec![writer, reader], &config("shared-buffer"))
        .await;

    assert!(report.success);
    assert_eq!(report.execution_order, vec!["writer", "reader"]);
}

/// Workflow deadline cancels a slow run with a descriptive reason.
#[tokio::test]
async fn workflow_deadline_is_descriptive() {
    let (controller, _) = controller_with(vec![
        MockReply::ok_json(json!("slow")).after(Duration::from_secs(30)),
    ]);
    let report = controller
        .run(
            vec![phase("hang")],
            &config("deadline").max_timeout(Duration::from_millis(40)),
        )
        .await;

    assert!(!report.success);
    assert!(report
        .termination_reason
        .as_deref()
        .unwrap()
        .contains("timed out after 40ms"));
}
