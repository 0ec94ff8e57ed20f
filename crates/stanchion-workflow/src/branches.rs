//! Branch walker: drives named branches of phases, each as a scoped
//! non-linear workflow, with sequential, concurrent, and racing groups.

use crate::controller::WorkflowController;
use crate::model::{Branch, BranchDecisionContext, Decision, DecisionOutcome, WorkflowConfig};
use crate::report::{WorkflowMetrics, WorkflowReport};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use stanchion_buffer::StableBuffer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Message attached to branches cancelled by a racing winner.
pub const BRANCH_RACE_CANCELLED: &str = "Cancelled - another branch won the race";

/// The result of one branch execution.
#[derive(Debug, Clone, Serialize)]
pub struct BranchRunReport {
    pub branch_id: String,
    pub branch_index: usize,
    /// True for racing losers.
    pub cancelled: bool,
    /// True for branches recorded as jumped over by a skip decision.
    pub skipped: bool,
    pub report: WorkflowReport,
}

impl BranchRunReport {
    /// Marker for a branch that was skipped over rather than executed.
    pub fn skipped_marker(branch_id: impl Into<String>, branch_index: usize) -> Self {
        let branch_id = branch_id.into();
        Self {
            branch_id: branch_id.clone(),
            branch_index,
            cancelled: false,
            skipped: true,
            report: WorkflowReport {
                workflow_id: branch_id,
                success: true,
                total_phases: 0,
                completed_phases: 0,
                execution_order: Vec::new(),
                phase_reports: Vec::new(),
                terminated_early: false,
                termination_reason: None,
                execution_time_ms: 0,
                metrics: WorkflowMetrics::default(),
            },
        }
    }
}

/// The result of walking a branch list.
#[derive(Debug, Clone, Serialize)]
pub struct BranchesReport {
    pub workflow_id: String,
    pub success: bool,
    pub branch_reports: Vec<BranchRunReport>,
    /// Branch ids in execution order; replays repeat.
    pub execution_order: Vec<String>,
    pub terminated_early: bool,
    pub termination_reason: Option<String>,
    pub execution_time_ms: u64,
}

/// Walks branches, applying branch decisions between runs.
#[derive(Clone)]
pub struct BranchWalker {
    controller: WorkflowController,
}

impl BranchWalker {
    pub fn new(controller: WorkflowController) -> Self {
        Self { controller }
    }

    /// Runs the branch list, starting at `branches[0]`, sharing one buffer
    /// across every branch.
    pub async fn run(&self, branches: Vec<Branch>, config: &WorkflowConfig) -> BranchesReport {
        let buffer = Arc::new(StableBuffer::new());
        self.run_with_buffer(branches, config, buffer).await
    }

    /// Runs the branch list against a caller-supplied shared buffer.
    pub async fn run_with_buffer(
        &self,
        branches: Vec<Branch>,
        config: &WorkflowConfig,
        buffer: Arc<StableBuffer>,
    ) -> BranchesReport {
        match config.max_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drive(branches, config, buffer)).await {
                    Ok(report) => report,
                    Err(_) => BranchesReport {
                        workflow_id: config.workflow_id.clone(),
                        success: false,
                        branch_reports: Vec::new(),
                        execution_order: Vec::new(),
                        terminated_early: true,
                        termination_reason: Some(format!(
                            "workflow timed out after {}ms",
                            limit.as_millis()
                        )),
                        execution_time_ms: limit.as_millis() as u64,
                    },
                }
            }
            None => self.drive(branches, config, buffer).await,
        }
    }

    fn branch_config(&self, branch: &Branch, config: &WorkflowConfig) -> WorkflowConfig {
        let mut sub = config.clone();
        sub.workflow_id = format!("{}-branch-{}", config.workflow_id, branch.id);
        // The walker owns the deadline; branch runs must not race it.
        sub.max_timeout = None;
        sub.concurrent_phase_execution = false;
        if let Some(branch_common) = &branch.common_config {
            sub.common_config = Some(match &config.common_config {
                Some(outer) => outer.layered_with(branch_common),
                None => branch_common.clone(),
            });
        }
        sub
    }

    async fn run_branch(
        &self,
        branch: &Branch,
        branch_index: usize,
        config: &WorkflowConfig,
        buffer: &Arc<StableBuffer>,
    ) -> BranchRunReport {
        let sub = self.branch_config(branch, config);
        let report = self
            .controller
            .run_with_buffer(branch.phases.clone(), &sub, Arc::clone(buffer))
            .await;
        BranchRunReport {
            branch_id: branch.id.clone(),
            branch_index,
            cancelled: false,
            skipped: false,
            report,
        }
    }

    async fn drive(
        &self,
        mut branches: Vec<Branch>,
        config: &WorkflowConfig,
        buffer: Arc<StableBuffer>,
    ) -> BranchesReport {
        let run_started = Instant::now();
        let mut branch_reports: Vec<BranchRunReport> = Vec::new();
        let mut execution_order: Vec<String> = Vec::new();
        let mut history: Vec<WorkflowReport> = Vec::new();
        let mut replay_counts: HashMap<String, u32> = HashMap::new();
        let mut execution_counts: HashMap<String, u32> = HashMap::new();
        let mut terminated_early = false;
        let mut termination_reason: Option<String> = None;

        let mut index = 0usize;
        let mut iterations = 0u32;

        while index < branches.len() {
            iterations += 1;
            if iterations > config.max_workflow_iterations {
                terminated_early = true;
                termination_reason = Some(format!(
                    "iteration cap of {} reached",
                    config.max_workflow_iterations
                ));
                break;
            }

            // Contiguous marked branches run as one concurrent group.
            if branches[index].mark_concurrent {
                let mut end = index;
                while end < branches.len() && branches[end].mark_concurrent {
                    end += 1;
                }
                let group: Vec<(usize, Branch)> =
                    (index..end).map(|i| (i, branches[i].clone())).collect();

                let results = if config.enable_branch_racing {
                    self.race_group(&group, config, &buffer).await
                } else {
                    let futures = group
                        .iter()
                        .map(|(i, branch)| self.run_branch(branch, *i, config, &buffer));
                    join_all(futures).await
                };

                for result in results {
                    execution_order.push(result.branch_id.clone());
                    if !result.cancelled {
                        history.push(result.report.clone());
                    }
                    branch_reports.push(result);
                }
                index = end;
                continue;
            }

            let branch = branches[index].clone();
            let run = self.run_branch(&branch, index, config, &buffer).await;
            let execution_number = {
                let count = execution_counts.entry(branch.id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            execution_order.push(branch.id.clone());
            history.push(run.report.clone());
            branch_reports.push(run.clone());

            let outcome = match &branch.decision_hook {
                Some(hook) => {
                    let context = BranchDecisionContext {
                        branch_id: branch.id.clone(),
                        branch_index: index,
                        execution_number,
                        branch_result: run.report.clone(),
                        execution_history: history.clone(),
                        branch_execution_history: execution_order.clone(),
                        buffer: buffer.read().await,
                    };
                    match hook(context).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::warn!(
                                workflow = %config.workflow_id,
                                branch = %branch.id,
                                error = %err,
                                "branch decision hook failed; continuing"
                            );
                            DecisionOutcome::default()
                        }
                    }
                }
                None => DecisionOutcome::default(),
            };

            let DecisionOutcome {
                decision,
                add_phases: _,
                add_branches,
            } = outcome;

            if !add_branches.is_empty() {
                let insert_at = (index + 1).min(branches.len());
                for (offset, new_branch) in add_branches.into_iter().enumerate() {
                    branches.insert(insert_at + offset, new_branch);
                }
            }

            match decision.unwrap_or(Decision::Continue) {
                Decision::Continue => index += 1,
                Decision::Skip { target_id } => {
                    if !branch.allow_skip {
                        index += 1;
                    } else {
                        match target_id {
                            None => index += 1,
                            Some(target) => match branches.iter().position(|b| b.id == target) {
                                Some(position) => {
                                    for i in (index + 1)..position {
                                        branch_reports.push(BranchRunReport::skipped_marker(
                                            branches[i].id.clone(),
                                            i,
                                        ));
                                    }
                                    index = position;
                                }
                                None => {
                                    terminated_early = true;
                                    termination_reason =
                                        Some(format!("skip target '{target}' not found"));
                                    break;
                                }
                            },
                        }
                    }
                }
                Decision::Jump { target_id } => {
                    match branches.iter().position(|b| b.id == target_id) {
                        Some(position) => index = position,
                        None => {
                            terminated_early = true;
                            termination_reason =
                                Some(format!("jump target '{target_id}' not found"));
                            break;
                        }
                    }
                }
                Decision::Replay => {
                    if !branch.allow_replay {
                        index += 1;
                    } else {
                        let replays = replay_counts.entry(branch.id.clone()).or_insert(0);
                        *replays += 1;
                        let capped = branch
                            .max_replay_count
                            .map(|max| *replays > max)
                            .unwrap_or(false);
                        if capped {
                            index += 1;
                        }
                    }
                }
                Decision::Terminate { reason } => {
                    terminated_early = true;
                    termination_reason = Some(reason);
                    break;
                }
            }
        }

        let success = !terminated_early
            && branch_reports
                .iter()
                .filter(|r| !r.cancelled)
                .all(|r| r.report.success);

        BranchesReport {
            workflow_id: config.workflow_id.clone(),
            success,
            branch_reports,
            execution_order,
            terminated_early,
            termination_reason,
            execution_time_ms: run_started.elapsed().as_millis() as u64,
        }
    }

    /// Races a concurrent branch group: the first successful branch wins
    /// and the in-flight losers are cancelled by dropping their futures.
    async fn race_group(
        &self,
        group: &[(usize, Branch)],
        config: &WorkflowConfig,
        buffer: &Arc<StableBuffer>,
    ) -> Vec<BranchRunReport> {
        let mut in_flight: FuturesUnordered<_> = group
            .iter()
            .map(|(index, branch)| {
                let this = self.clone();
                let branch = branch.clone();
                let config = config.clone();
                let buffer = Arc::clone(buffer);
                let index = *index;
                async move { this.run_branch(&branch, index, &config, &buffer).await }
            })
            .collect();

        let mut finished: HashMap<String, BranchRunReport> = HashMap::new();
        let mut winner: Option<String> = None;
        while let Some(result) = in_flight.next().await {
            let id = result.branch_id.clone();
            let won = result.report.success;
            finished.insert(id.clone(), result);
            if won {
                winner = Some(id);
                break;
            }
        }
        // Dropping the stream aborts the remaining branch runs.
        drop(in_flight);

        group
            .iter()
            .map(|(index, branch)| match (&winner, finished.remove(&branch.id)) {
                (Some(winning_id), Some(run)) if &run.branch_id == winning_id => run,
                (Some(_), _) => BranchRunReport {
                    branch_id: branch.id.clone(),
                    branch_index: *index,
                    cancelled: true,
                    skipped: false,
                    report: WorkflowReport::aborted(
                        format!("{}-branch-{}", config.workflow_id, branch.id),
                        branch.phases.len(),
                        BRANCH_RACE_CANCELLED.to_string(),
                    ),
                },
                (None, Some(run)) => run,
                (None, None) => BranchRunReport {
                    branch_id: branch.id.clone(),
                    branch_index: *index,
                    cancelled: true,
                    skipped: false,
                    report: WorkflowReport::aborted(
                        format!("{}-branch-{}", config.workflow_id, branch.id),
                        branch.phases.len(),
                        BRANCH_RACE_CANCELLED.to_string(),
                    ),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{branch_decision_hook, Phase};
    use serde_json::json;
    use stanchion_core::{MockTransport, RequestSpec, Transport};
    use stanchion_engine::{AttemptConfig, ExecutionItem, Gateway};
    use std::time::Duration;

    fn walker() -> BranchWalker {
        let transport = Arc::new(MockTransport::always_ok(json!({"ok": true})));
        BranchWalker::new(WorkflowController::new(Gateway::new(
            transport as Arc<dyn Transport>,
        )))
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

    fn slow_phase(id: &str, delay: Duration) -> Phase {
        Phase::new(
            id,
            [ExecutionItem::function(id.to_string(), move |_| async move {
                tokio::time::sleep(delay).await;
                Ok(json!("done"))
            })],
        )
    }

    fn config(id: &str) -> WorkflowConfig {
        WorkflowConfig::new(id).attempt(AttemptConfig::builder().attempts(1).build())
    }

    #[tokio::test]
    async fn walks_branches_in_order() {
        let walker = walker();
        let branches = vec![
            Branch::new("first", vec![phase("a")]),
            Branch::new("second", vec![phase("b")]),
        ];
        let report = walker.run(branches, &config("wf")).await;

        assert!(report.success);
        assert_eq!(report.execution_order, vec!["first", "second"]);
        // Branch workflows are scoped with the walker's id.
        assert_eq!(
            report.branch_reports[0].report.workflow_id,
            "wf-branch-first"
        );
    }

    #[tokio::test]
    async fn branch_decision_jump_and_terminate() {
        let walker = walker();
        let first = Branch::new("first", vec![phase("a")]).decision_hook(branch_decision_hook(
            |_| async {
                Ok(DecisionOutcome::decision(Decision::Jump {
                    target_id: "third".to_string(),
                }))
            },
        ));
        let third = Branch::new("third", vec![phase("c")]).decision_hook(branch_decision_hook(
            |_| async {
                Ok(DecisionOutcome::decision(Decision::Terminate {
                    reason: "third is enough".to_string(),
                }))
            },
        ));
        let report = walker
            .run(
                vec![first, Branch::new("second", vec![phase("b")]), third],
                &config("wf"),
            )
            .await;

        assert_eq!(report.execution_order, vec!["first", "third"]);
        assert!(report.terminated_early);
        assert_eq!(report.termination_reason.as_deref(), Some("third is enough"));
    }

    #[tokio::test]
    async fn branch_skip_records_markers() {
        let walker = walker();
        let first = Branch::new("first", vec![phase("a")]).decision_hook(branch_decision_hook(
            |_| async {
                Ok(DecisionOutcome::decision(Decision::Skip {
                    target_id: Some("fourth".to_string()),
                }))
            },
        ));
        let report = walker
            .run(
                vec![
                    first,
                    Branch::new("second", vec![phase("b")]),
                    Branch::new("third", vec![phase("c")]),
                    Branch::new("fourth", vec![phase("d")]),
                ],
                &config("wf"),
            )
            .await;

        assert!(report.success);
        assert_eq!(report.execution_order, vec!["first", "fourth"]);
        let skipped: Vec<_> = report
            .branch_reports
            .iter()
            .filter(|r| r.skipped)
            .map(|r| r.branch_id.clone())
            .collect();
        assert_eq!(skipped, vec!["second", "third"]);
        // Skipped branches never executed a phase.
        assert!(report
            .branch_reports
            .iter()
            .filter(|r| r.skipped)
            .all(|r| r.report.phase_reports.is_empty()));
    }

    #[tokio::test]
    async fn branch_replay_cap() {
        let walker = walker();
        let looping = Branch::new("loop", vec![phase("a")])
            .max_replay_count(1)
            .decision_hook(branch_decision_hook(|_| async {
                Ok(DecisionOutcome::decision(Decision::Replay))
            }));
        let report = walker
            .run(vec![looping, Branch::new("after", vec![phase("b")])], &config("wf"))
            .await;

        assert_eq!(report.execution_order, vec!["loop", "loop", "after"]);
    }

    #[tokio::test]
    async fn dynamic_branch_insertion() {
        let walker = walker();
        let seeding = Branch::new("seed", vec![phase("a")]).decision_hook(branch_decision_hook(
            |ctx| async move {
                if ctx.execution_number == 1 {
                    Ok(DecisionOutcome::default()
                        .with_branches(vec![Branch::new("grown", vec![Phase::new(
                            "grown-phase",
                            [ExecutionItem::function("fn", |_| async { Ok(json!(1)) })],
                        )])]))
                } else {
                    Ok(DecisionOutcome::default())
                }
            },
        ));
        let report = walker
            .run(vec![seeding, Branch::new("tail", vec![phase("b")])], &config("wf"))
            .await;

        assert_eq!(report.execution_order, vec!["seed", "grown", "tail"]);
    }

    #[tokio::test]
    async fn concurrent_branch_group_all_settled() {
        let walker = walker();
        let branches = vec![
            Branch::new("g1", vec![phase("a")]).mark_concurrent(true),
            Branch::new("g2", vec![phase("b")]).mark_concurrent(true),
            Branch::new("tail", vec![phase("c")]),
        ];
        let report = walker.run(branches, &config("wf")).await;

        assert!(report.success);
        assert_eq!(report.branch_reports.len(), 3);
        assert_eq!(report.execution_order.last().map(String::as_str), Some("tail"));
    }

    #[tokio::test]
    async fn racing_branches_cancel_losers() {
        let walker = walker();
        let branches = vec![
            Branch::new("slow", vec![slow_phase("s", Duration::from_secs(5))])
                .mark_concurrent(true),
            Branch::new("fast", vec![slow_phase("f", Duration::from_millis(10))])
                .mark_concurrent(true),
        ];
        let cfg = config("wf-race").enable_branch_racing(true);

        let started = std::time::Instant::now();
        let report = walker.run(branches, &cfg).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(report.success);
        let fast = report
            .branch_reports
            .iter()
            .find(|r| r.branch_id == "fast")
            .unwrap();
        let slow = report
            .branch_reports
            .iter()
            .find(|r| r.branch_id == "slow")
            .unwrap();
        assert!(!fast.cancelled);
        assert!(fast.report.success);
        assert!(slow.cancelled);
        assert_eq!(
            slow.report.termination_reason.as_deref(),
            Some(BRANCH_RACE_CANCELLED)
        );
    }
}
