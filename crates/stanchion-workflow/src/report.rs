//! Workflow reports and metrics rollup.

use crate::phase::{phase_gauges, PhaseReport};
use serde::Serialize;
use stanchion_buffer::BufferMetrics;
use stanchion_core::{GuardrailReport, MetricsGuardrails};
use std::collections::BTreeMap;

/// Rolled-up counters across every phase of one workflow run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowMetrics {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub cache_hits: usize,
    pub retries: u32,
    pub execution_time_ms: u64,
    pub buffer: Option<BufferMetrics>,
    /// Guardrail evaluation for this run, when guardrails are configured.
    pub validation: Option<GuardrailReport>,
}

impl WorkflowMetrics {
    /// Builds the rollup from executed phase reports.
    pub fn from_phases(reports: &[PhaseReport], execution_time_ms: u64) -> Self {
        let mut metrics = WorkflowMetrics {
            execution_time_ms,
            ..Self::default()
        };
        for report in reports.iter().filter(|r| !r.skipped) {
            metrics.total_requests += report.total_requests;
            metrics.successful_requests += report.successful_requests;
            metrics.failed_requests += report.failed_requests;
            for item in &report.responses {
                metrics.retries += item.outcome.metrics.retries;
                if item.outcome.from_cache {
                    metrics.cache_hits += 1;
                }
            }
        }
        metrics
    }

    /// Flattens the rollup (plus per-phase figures) into named gauges.
    pub fn gauges(&self, reports: &[PhaseReport]) -> BTreeMap<String, f64> {
        let mut gauges = BTreeMap::new();
        gauges.insert("total_requests".to_string(), self.total_requests as f64);
        gauges.insert(
            "successful_requests".to_string(),
            self.successful_requests as f64,
        );
        gauges.insert("failed_requests".to_string(), self.failed_requests as f64);
        gauges.insert("cache_hits".to_string(), self.cache_hits as f64);
        gauges.insert("retries".to_string(), self.retries as f64);
        gauges.insert(
            "execution_time_ms".to_string(),
            self.execution_time_ms as f64,
        );
        for report in reports {
            for (name, value) in phase_gauges(report) {
                gauges.insert(name, value);
            }
        }
        gauges
    }

    /// Runs the guardrail table over the rolled-up gauges.
    pub fn validate(&mut self, guardrails: &MetricsGuardrails, reports: &[PhaseReport]) {
        let gauges = self.gauges(reports);
        self.validation = Some(guardrails.validate(&gauges));
    }
}

/// The result of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow_id: String,
    pub success: bool,
    pub total_phases: usize,
    /// Phases actually attempted (skip markers excluded).
    pub completed_phases: usize,
    /// Phase ids in execution order; replays repeat, skips are absent.
    pub execution_order: Vec<String>,
    pub phase_reports: Vec<PhaseReport>,
    pub terminated_early: bool,
    pub termination_reason: Option<String>,
    pub execution_time_ms: u64,
    pub metrics: WorkflowMetrics,
}

impl WorkflowReport {
    /// A run that never got to execute anything (e.g. workflow timeout).
    pub fn aborted(workflow_id: impl Into<String>, total_phases: usize, reason: String) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            success: false,
            total_phases,
            completed_phases: 0,
            execution_order: Vec::new(),
            phase_reports: Vec::new(),
            terminated_early: true,
            termination_reason: Some(reason),
            execution_time_ms: 0,
            metrics: WorkflowMetrics::default(),
        }
    }
}
