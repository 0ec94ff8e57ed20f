//! Phase executor: runs one phase's items through the gateway with the
//! workflow's configuration layering applied.

use crate::model::{Phase, WorkflowConfig};
use serde::Serialize;
use serde_json::Value;
use stanchion_buffer::StableBuffer;
use stanchion_core::{ExecutionContext, PersistenceCoordinator};
use stanchion_engine::{summarize, Gateway, GatewayConfig, HookEnv, ItemReport};
use std::sync::Arc;
use std::time::Instant;

/// Report for one phase execution.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase_id: String,
    pub phase_index: usize,
    pub success: bool,
    /// True for phases recorded as jumped over by a skip decision.
    pub skipped: bool,
    pub execution_time_ms: u64,
    pub responses: Vec<ItemReport>,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
}

impl PhaseReport {
    /// Marker for a phase that was skipped over rather than executed.
    pub fn skipped_marker(phase_id: impl Into<String>, phase_index: usize) -> Self {
        Self {
            phase_id: phase_id.into(),
            phase_index,
            success: true,
            skipped: true,
            execution_time_ms: 0,
            responses: Vec::new(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
        }
    }
}

/// Executes single phases.
#[derive(Clone)]
pub struct PhaseExecutor {
    gateway: Gateway,
}

impl PhaseExecutor {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Runs one phase. Configuration layers merge per item: workflow keys,
    /// then request-group keys (by `group_id`), then phase keys, then item
    /// keys; unknown keys pass through untouched.
    pub async fn execute(
        &self,
        phase: &Phase,
        phase_index: usize,
        config: &WorkflowConfig,
        buffer: &Arc<StableBuffer>,
        run_id: &str,
    ) -> PhaseReport {
        let started = Instant::now();

        let items: Vec<_> = phase.items.iter().map(|pi| pi.item.clone()).collect();
        let overrides: Vec<_> = phase
            .items
            .iter()
            .map(|pi| {
                config.overrides_for_item(
                    pi.item.group_id(),
                    phase.common_config.as_ref(),
                    pi.overrides.as_ref(),
                )
            })
            .collect();

        let mut gateway_config = GatewayConfig::builder()
            .concurrent(phase.concurrent)
            .stop_on_first_error(phase.stop_on_first_error)
            .racing(phase.enable_racing)
            .attempt(config.attempt.clone())
            .item_overrides(overrides);
        if let Some(limit) = phase.max_concurrent {
            gateway_config = gateway_config.max_concurrent(limit);
        }
        if let Some(limiter) = &phase.rate_limiter {
            gateway_config = gateway_config.rate_limiter(Arc::clone(limiter));
        }
        if let Some(breaker) = &phase.circuit_breaker {
            gateway_config = gateway_config.circuit_breaker(Arc::clone(breaker));
        }
        let gateway_config = gateway_config.build();

        let persistence = phase
            .state_persistence
            .clone()
            .or_else(|| config.persistence.clone());
        let context = ExecutionContext::for_workflow(&config.workflow_id)
            .with_phase(&phase.id)
            .with_run(run_id);
        let env = HookEnv {
            coordinator: PersistenceCoordinator::new(persistence),
            context,
            buffer: buffer.read().await,
            transaction_logs: config
                .attempt
                .loads_transaction_logs()
                .then(|| buffer.transaction_logs_json()),
        };

        let responses = self.gateway.execute(&items, &gateway_config, &env).await;
        let summary = summarize(&responses);

        tracing::debug!(
            workflow = %config.workflow_id,
            phase = %phase.id,
            total = summary.total,
            failed = summary.failed,
            "phase completed"
        );

        PhaseReport {
            phase_id: phase.id.clone(),
            phase_index,
            success: summary.failed == 0,
            skipped: false,
            execution_time_ms: started.elapsed().as_millis() as u64,
            responses,
            total_requests: summary.total,
            successful_requests: summary.successful,
            failed_requests: summary.failed,
        }
    }
}

/// Flattens a phase report into named gauges for guardrail evaluation.
pub(crate) fn phase_gauges(report: &PhaseReport) -> Vec<(String, f64)> {
    vec![
        (
            format!("phase.{}.total_requests", report.phase_id),
            report.total_requests as f64,
        ),
        (
            format!("phase.{}.failed_requests", report.phase_id),
            report.failed_requests as f64,
        ),
        (
            format!("phase.{}.execution_time_ms", report.phase_id),
            report.execution_time_ms as f64,
        ),
    ]
}

pub(crate) fn report_to_value(report: &PhaseReport) -> Value {
    serde_json::to_value(report).unwrap_or(Value::Null)
}
