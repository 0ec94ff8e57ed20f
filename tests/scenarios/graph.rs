//! Graph scenarios: cycle rejection and full DAG execution.

use serde_json::json;
use stanchion_core::{Error, MockTransport, RequestSpec, Transport};
use stanchion_engine::{AttemptConfig, ExecutionItem, Gateway};
use stanchion_workflow::{
    GraphRunner, Phase, WorkflowConfig, WorkflowController, WorkflowGraph,
};
use std::sync::Arc;

fn phase(id: &str) -> Phase {
    Phase::new(
        id,
        [ExecutionItem::request(RequestSpec::get(
            "api.example.com",
            format!("/{id}"),
        ))],
    )
}

fn runner() -> GraphRunner {
    let transport = Arc::new(MockTransport::always_ok(json!("ok")));
    GraphRunner::new(WorkflowController::new(Gateway::new(
        transport as Arc<dyn Transport>,
    )))
}

/// `build()` on X -> Y -> X throws a validation error citing the cycle.
#[tokio::test]
async fn cycle_is_cited_in_the_error() {
    let err = WorkflowGraph::builder()
        .add_phase(phase("X"))
        .add_phase(phase("Y"))
        .edge("X", "Y")
        .edge("Y", "X")
        .entry_point("X")
        .build()
        .unwrap_err();

    let Error::GraphValidation(message) = err else {
        panic!("expected a graph validation error");
    };
    assert!(
        message.contains("X -> Y -> X") || message.contains("Y -> X -> Y"),
        "cycle path missing from: {message}"
    );
}

/// A diamond-shaped DAG: fan out behind a parallel group, merge, finish.
#[tokio::test]
async fn diamond_graph_executes_end_to_end() {
    let graph = WorkflowGraph::builder()
        .add_phase(phase("ingest"))
        .add_phase(phase("enrich"))
        .add_phase(phase("score"))
        .add_parallel_group("fanout", vec!["enrich".to_string(), "score".to_string()])
        .add_merge("collect", vec!["enrich".to_string(), "score".to_string()])
        .add_phase(phase("publish"))
        .edge("ingest", "fanout")
        .edge("fanout", "collect")
        .edge("collect", "publish")
        .entry_point("ingest")
        .build()
        .unwrap();

    let config =
        WorkflowConfig::new("diamond").attempt(AttemptConfig::builder().attempts(1).build());
    let report = runner().run(&graph, &config).await;

    assert!(report.success, "reason: {:?}", report.termination_reason);
    let order: Vec<_> = report.executed.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(order.first(), Some(&"ingest"));
    assert_eq!(order.last(), Some(&"publish"));

    // The conditional routing context saw both members complete.
    let enrich = report.executed.iter().find(|r| r.node_id == "enrich");
    assert!(enrich.map(|r| r.success).unwrap_or(false));
}

/// Conditional edges route on buffer/result context.
#[tokio::test]
async fn conditional_node_routes_on_results() {
    let graph = WorkflowGraph::builder()
        .add_phase(phase("probe"))
        .add_conditional("route", |ctx| {
            let probe_ok = ctx
                .results
                .get("probe")
                .and_then(|r| r.get("success"))
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if probe_ok { "happy" } else { "sad" }.to_string()
        })
        .add_phase(phase("happy"))
        .add_phase(phase("sad"))
        .edge("probe", "route")
        .edge("route", "happy")
        .edge("route", "sad")
        .entry_point("probe")
        .build()
        .unwrap();

    let config =
        WorkflowConfig::new("routed").attempt(AttemptConfig::builder().attempts(1).build());
    let report = runner().run(&graph, &config).await;

    let order: Vec<_> = report.executed.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(order, vec!["probe", "route", "happy"]);
}
