//! Non-linear workflow controller.
//!
//! Walks a phase list by index, but each phase's decision hook can redirect
//! the walk: continue, skip (with markers for jumped-over phases), jump,
//! replay (capped), terminate, or splice new phases in after the current
//! index. An iteration guard bounds decision evaluations; a workflow-level
//! deadline cancels the whole run with a descriptive reason.

use crate::model::{Decision, DecisionOutcome, Phase, PhaseDecisionContext, WorkflowConfig};
use crate::phase::{PhaseExecutor, PhaseReport};
use crate::report::{WorkflowMetrics, WorkflowReport};
use futures::future::join_all;
use stanchion_buffer::StableBuffer;
use stanchion_engine::Gateway;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_run_id() -> String {
    format!("run-{}", RUN_SEQ.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Drives non-linear workflows over a phase executor.
#[derive(Clone)]
pub struct WorkflowController {
    executor: PhaseExecutor,
}

impl WorkflowController {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            executor: PhaseExecutor::new(gateway),
        }
    }

    pub fn from_executor(executor: PhaseExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &PhaseExecutor {
        &self.executor
    }

    /// Runs a workflow with a fresh private buffer.
    pub async fn run(&self, phases: Vec<Phase>, config: &WorkflowConfig) -> WorkflowReport {
        self.run_with_buffer(phases, config, Arc::new(StableBuffer::new()))
            .await
    }

    /// Runs a workflow against a caller-supplied shared buffer.
    pub async fn run_with_buffer(
        &self,
        phases: Vec<Phase>,
        config: &WorkflowConfig,
        buffer: Arc<StableBuffer>,
    ) -> WorkflowReport {
        let total = phases.len();
        match config.max_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drive(phases, config, buffer)).await {
                    Ok(report) => report,
                    Err(_) => {
                        tracing::warn!(workflow = %config.workflow_id, "workflow deadline exceeded");
                        WorkflowReport::aborted(
                            &config.workflow_id,
                            total,
                            format!("workflow timed out after {}ms", limit.as_millis()),
                        )
                    }
                }
            }
            None => self.drive(phases, config, buffer).await,
        }
    }

    async fn drive(
        &self,
        mut phases: Vec<Phase>,
        config: &WorkflowConfig,
        buffer: Arc<StableBuffer>,
    ) -> WorkflowReport {
        let run_started = Instant::now();
        let run_id = next_run_id();

        let mut reports: Vec<PhaseReport> = Vec::new();
        let mut execution_order: Vec<String> = Vec::new();
        let mut terminated_early = false;
        let mut termination_reason: Option<String> = None;

        if config.concurrent_phase_execution {
            // All phases fan out simultaneously; decisions do not apply.
            let futures = phases
                .iter()
                .enumerate()
                .map(|(index, phase)| self.executor.execute(phase, index, config, &buffer, &run_id));
            reports = join_all(futures).await;
            execution_order = reports.iter().map(|r| r.phase_id.clone()).collect();
            return self.assemble(
                config,
                &phases,
                reports,
                execution_order,
                false,
                None,
                run_started,
                &buffer,
            );
        }

        let mut index = 0usize;
        let mut iterations = 0u32;
        let mut replay_counts: HashMap<String, u32> = HashMap::new();
        let mut execution_counts: HashMap<String, u32> = HashMap::new();

        while index < phases.len() {
            iterations += 1;
            if iterations > config.max_workflow_iterations {
                terminated_early = true;
                termination_reason = Some(format!(
                    "iteration cap of {} reached",
                    config.max_workflow_iterations
                ));
                break;
            }

            // A contiguous block of marked phases executes as one parallel
            // group before the walk returns to sequential mode.
            if phases[index].mark_concurrent {
                let mut end = index;
                while end < phases.len() && phases[end].mark_concurrent {
                    end += 1;
                }
                let group: Vec<(usize, Phase)> =
                    (index..end).map(|i| (i, phases[i].clone())).collect();
                let futures = group
                    .iter()
                    .map(|(i, phase)| self.executor.execute(phase, *i, config, &buffer, &run_id));
                let results = join_all(futures).await;
                let group_ok = results.iter().all(|r| r.success);
                for result in results {
                    *execution_counts.entry(result.phase_id.clone()).or_insert(0) += 1;
                    execution_order.push(result.phase_id.clone());
                    reports.push(result);
                }
                if !group_ok && config.stop_on_phase_error {
                    terminated_early = true;
                    termination_reason =
                        Some("concurrent phase group failed with stop-on-error enabled".to_string());
                    break;
                }
                index = end;
                continue;
            }

            let phase = phases[index].clone();
            let report = self
                .executor
                .execute(&phase, index, config, &buffer, &run_id)
                .await;
            let execution_number = {
                let count = execution_counts.entry(phase.id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            execution_order.push(phase.id.clone());
            reports.push(report.clone());

            let outcome = match &phase.decision_hook {
                Some(hook) => {
                    let context = PhaseDecisionContext {
                        phase_id: phase.id.clone(),
                        phase_index: index,
                        execution_number,
                        phase_result: report.clone(),
                        execution_history: reports.clone(),
                        buffer: buffer.read().await,
                    };
                    match hook(context).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            // A failing decision hook degrades to CONTINUE.
                            tracing::warn!(
                                workflow = %config.workflow_id,
                                phase = %phase.id,
                                error = %err,
                                "phase decision hook failed; continuing"
                            );
                            DecisionOutcome::default()
                        }
                    }
                }
                None => {
                    if !report.success && config.stop_on_phase_error {
                        terminated_early = true;
                        termination_reason = Some(format!(
                            "phase '{}' failed with stop-on-error enabled",
                            phase.id
                        ));
                        break;
                    }
                    DecisionOutcome::default()
                }
            };

            let DecisionOutcome {
                decision,
                add_phases,
                add_branches: _,
            } = outcome;

            if !add_phases.is_empty() {
                let insert_at = (index + 1).min(phases.len());
                for (offset, phase) in add_phases.into_iter().enumerate() {
                    phases.insert(insert_at + offset, phase);
                }
            }

            match decision.unwrap_or(Decision::Continue) {
                Decision::Continue => index += 1,
                Decision::Skip { target_id } => {
                    if !phase.allow_skip {
                        tracing::debug!(phase = %phase.id, "skip refused: allow_skip is false");
                        index += 1;
                    } else {
                        match target_id {
                            None => index += 1,
                            Some(target) => match position_of(&phases, &target) {
                                Some(position) => {
                                    for i in (index + 1)..position {
                                        reports.push(PhaseReport::skipped_marker(
                                            phases[i].id.clone(),
                                            i,
                                        ));
                                    }
                                    index = position;
                                }
                                None => {
                                    terminated_early = true;
                                    termination_reason = Some(
                                        stanchion_core::Error::PhaseNotFound(target).to_string(),
                                    );
                                    break;
                                }
                            },
                        }
                    }
                }
                Decision::Jump { target_id } => match position_of(&phases, &target_id) {
                    Some(position) => index = position,
                    None => {
                        terminated_early = true;
                        termination_reason = Some(
                            stanchion_core::Error::PhaseNotFound(target_id).to_string(),
                        );
                        break;
                    }
                },
                Decision::Replay => {
                    if !phase.allow_replay {
                        tracing::debug!(phase = %phase.id, "replay refused: allow_replay is false");
                        index += 1;
                    } else {
                        let replays = replay_counts.entry(phase.id.clone()).or_insert(0);
                        *replays += 1;
                        let capped = phase
                            .max_replay_count
                            .map(|max| *replays > max)
                            .unwrap_or(false);
                        if capped {
                            tracing::debug!(phase = %phase.id, "replay cap reached; continuing");
                            index += 1;
                        }
                        // Otherwise stay at the same index and re-execute.
                    }
                }
                Decision::Terminate { reason } => {
                    terminated_early = true;
                    termination_reason = Some(reason);
                    break;
                }
            }
        }

        self.assemble(
            config,
            &phases,
            reports,
            execution_order,
            terminated_early,
            termination_reason,
            run_started,
            &buffer,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        config: &WorkflowConfig,
        phases: &[Phase],
        reports: Vec<PhaseReport>,
        execution_order: Vec<String>,
        terminated_early: bool,
        termination_reason: Option<String>,
        run_started: Instant,
        buffer: &Arc<StableBuffer>,
    ) -> WorkflowReport {
        let elapsed = run_started.elapsed().as_millis() as u64;
        let completed_phases = reports.iter().filter(|r| !r.skipped).count();
        let executed_ok = reports.iter().filter(|r| !r.skipped).all(|r| r.success);
        let success = executed_ok && !terminated_early;

        let mut metrics = WorkflowMetrics::from_phases(&reports, elapsed);
        metrics.buffer = Some(buffer.metrics());
        if let Some(guardrails) = &config.guardrails {
            metrics.validate(guardrails, &reports);
        }

        WorkflowReport {
            workflow_id: config.workflow_id.clone(),
            success,
            total_phases: phases.len(),
            completed_phases,
            execution_order,
            phase_reports: reports,
            terminated_early,
            termination_reason,
            execution_time_ms: elapsed,
            metrics,
        }
    }
}

fn position_of(phases: &[Phase], id: &str) -> Option<usize> {
    phases.iter().position(|p| p.id == id)
}
