//! Workflow model: phases, branches, decisions, and configuration.

use futures::future::BoxFuture;
use serde_json::Value;
use stanchion_circuitbreaker::CircuitBreaker;
use stanchion_core::{MetricsGuardrails, StateHook};
use stanchion_engine::{AttemptConfig, AttemptOverrides, ExecutionItem};
use stanchion_ratelimiter::RateLimiter;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::phase::PhaseReport;
use crate::report::WorkflowReport;

/// One item inside a phase, optionally carrying item-level option overrides
/// (item keys beat phase, group, and workflow keys).
#[derive(Debug, Clone)]
pub struct PhaseItem {
    pub item: ExecutionItem,
    pub overrides: Option<AttemptOverrides>,
}

impl PhaseItem {
    pub fn with_overrides(mut self, overrides: AttemptOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

impl From<ExecutionItem> for PhaseItem {
    fn from(item: ExecutionItem) -> Self {
        Self {
            item,
            overrides: None,
        }
    }
}

/// A bundle of items forming one step in a workflow.
#[derive(Clone)]
pub struct Phase {
    pub id: String,
    pub items: Vec<PhaseItem>,
    pub concurrent: bool,
    pub stop_on_first_error: bool,
    pub enable_racing: bool,
    pub max_concurrent: Option<usize>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub allow_replay: bool,
    pub max_replay_count: Option<u32>,
    pub allow_skip: bool,
    pub decision_hook: Option<PhaseDecisionHook>,
    pub state_persistence: Option<StateHook>,
    pub common_config: Option<AttemptOverrides>,
    /// Marks this phase as part of a contiguous concurrent block.
    pub mark_concurrent: bool,
}

impl Phase {
    pub fn new(id: impl Into<String>, items: impl IntoIterator<Item = ExecutionItem>) -> Self {
        Self {
            id: id.into(),
            items: items.into_iter().map(PhaseItem::from).collect(),
            concurrent: false,
            stop_on_first_error: false,
            enable_racing: false,
            max_concurrent: None,
            rate_limiter: None,
            circuit_breaker: None,
            allow_replay: true,
            max_replay_count: None,
            allow_skip: true,
            decision_hook: None,
            state_persistence: None,
            common_config: None,
            mark_concurrent: false,
        }
    }

    pub fn concurrent(mut self, enabled: bool) -> Self {
        self.concurrent = enabled;
        self
    }

    pub fn stop_on_first_error(mut self, enabled: bool) -> Self {
        self.stop_on_first_error = enabled;
        self
    }

    pub fn racing(mut self, enabled: bool) -> Self {
        self.enable_racing = enabled;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn allow_replay(mut self, allowed: bool) -> Self {
        self.allow_replay = allowed;
        self
    }

    pub fn max_replay_count(mut self, n: u32) -> Self {
        self.max_replay_count = Some(n);
        self
    }

    pub fn allow_skip(mut self, allowed: bool) -> Self {
        self.allow_skip = allowed;
        self
    }

    pub fn decision_hook(mut self, hook: PhaseDecisionHook) -> Self {
        self.decision_hook = Some(hook);
        self
    }

    pub fn state_persistence(mut self, hook: StateHook) -> Self {
        self.state_persistence = Some(hook);
        self
    }

    pub fn common_config(mut self, overrides: AttemptOverrides) -> Self {
        self.common_config = Some(overrides);
        self
    }

    pub fn mark_concurrent(mut self, marked: bool) -> Self {
        self.mark_concurrent = marked;
        self
    }

    /// Adds one item.
    pub fn push_item(mut self, item: impl Into<PhaseItem>) -> Self {
        self.items.push(item.into());
        self
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("id", &self.id)
            .field("items", &self.items.len())
            .field("concurrent", &self.concurrent)
            .field("mark_concurrent", &self.mark_concurrent)
            .finish_non_exhaustive()
    }
}

/// Runtime decision returned by phase and branch decision hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Advance by one.
    Continue,
    /// Jump to the named target, else advance by one; phases skipped over
    /// are recorded with a skipped marker.
    Skip { target_id: Option<String> },
    /// Move to the named target; a missing target terminates the workflow.
    Jump { target_id: String },
    /// Re-execute the current phase/branch, subject to replay caps.
    Replay,
    /// Stop the workflow with a reason.
    Terminate { reason: String },
}

/// A decision plus optional dynamic insertions.
#[derive(Clone, Default)]
pub struct DecisionOutcome {
    pub decision: Option<Decision>,
    /// Phases spliced in after the current index.
    pub add_phases: Vec<Phase>,
    /// Branches spliced in after the current branch (branch walker only).
    pub add_branches: Vec<Branch>,
}

impl DecisionOutcome {
    pub fn decision(decision: Decision) -> Self {
        Self {
            decision: Some(decision),
            ..Self::default()
        }
    }

    pub fn with_phases(mut self, phases: Vec<Phase>) -> Self {
        self.add_phases = phases;
        self
    }

    pub fn with_branches(mut self, branches: Vec<Branch>) -> Self {
        self.add_branches = branches;
        self
    }

    pub(crate) fn effective_decision(&self) -> Decision {
        self.decision.clone().unwrap_or(Decision::Continue)
    }
}

impl From<Decision> for DecisionOutcome {
    fn from(decision: Decision) -> Self {
        Self::decision(decision)
    }
}

/// Context handed to a phase decision hook.
#[derive(Debug, Clone)]
pub struct PhaseDecisionContext {
    pub phase_id: String,
    pub phase_index: usize,
    /// How many times this phase has executed, including this run.
    pub execution_number: u32,
    pub phase_result: PhaseReport,
    pub execution_history: Vec<PhaseReport>,
    /// Snapshot of the shared buffer.
    pub buffer: Value,
}

/// Async callable deciding what happens after a phase completes.
pub type PhaseDecisionHook =
    Arc<dyn Fn(PhaseDecisionContext) -> BoxFuture<'static, stanchion_core::Result<DecisionOutcome>> + Send + Sync>;

/// Wraps an async closure as a [`PhaseDecisionHook`].
pub fn phase_decision_hook<F, Fut>(f: F) -> PhaseDecisionHook
where
    F: Fn(PhaseDecisionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = stanchion_core::Result<DecisionOutcome>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wraps a synchronous closure as a [`PhaseDecisionHook`].
pub fn sync_phase_decision_hook<F>(f: F) -> PhaseDecisionHook
where
    F: Fn(&PhaseDecisionContext) -> Decision + Send + Sync + 'static,
{
    Arc::new(move |ctx| {
        let decision = f(&ctx);
        Box::pin(async move { Ok(DecisionOutcome::decision(decision)) })
    })
}

/// A named ordered list of phases managed by the branch walker.
#[derive(Clone)]
pub struct Branch {
    pub id: String,
    pub phases: Vec<Phase>,
    /// Marks this branch as part of a contiguous concurrent block.
    pub mark_concurrent: bool,
    pub allow_replay: bool,
    pub allow_skip: bool,
    pub max_replay_count: Option<u32>,
    pub common_config: Option<AttemptOverrides>,
    pub decision_hook: Option<BranchDecisionHook>,
}

impl Branch {
    pub fn new(id: impl Into<String>, phases: Vec<Phase>) -> Self {
        Self {
            id: id.into(),
            phases,
            mark_concurrent: false,
            allow_replay: true,
            allow_skip: true,
            max_replay_count: None,
            common_config: None,
            decision_hook: None,
        }
    }

    pub fn mark_concurrent(mut self, marked: bool) -> Self {
        self.mark_concurrent = marked;
        self
    }

    pub fn allow_replay(mut self, allowed: bool) -> Self {
        self.allow_replay = allowed;
        self
    }

    pub fn allow_skip(mut self, allowed: bool) -> Self {
        self.allow_skip = allowed;
        self
    }

    pub fn max_replay_count(mut self, n: u32) -> Self {
        self.max_replay_count = Some(n);
        self
    }

    pub fn common_config(mut self, overrides: AttemptOverrides) -> Self {
        self.common_config = Some(overrides);
        self
    }

    pub fn decision_hook(mut self, hook: BranchDecisionHook) -> Self {
        self.decision_hook = Some(hook);
        self
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("id", &self.id)
            .field("phases", &self.phases.len())
            .field("mark_concurrent", &self.mark_concurrent)
            .finish_non_exhaustive()
    }
}

/// Context handed to a branch decision hook.
#[derive(Debug, Clone)]
pub struct BranchDecisionContext {
    pub branch_id: String,
    pub branch_index: usize,
    /// How many times this branch has executed, including this run.
    pub execution_number: u32,
    pub branch_result: WorkflowReport,
    /// Every branch run so far, in completion order.
    pub execution_history: Vec<WorkflowReport>,
    /// Branch ids in execution order.
    pub branch_execution_history: Vec<String>,
    /// Snapshot of the shared buffer.
    pub buffer: Value,
}

/// Async callable deciding what happens after a branch completes.
pub type BranchDecisionHook =
    Arc<dyn Fn(BranchDecisionContext) -> BoxFuture<'static, stanchion_core::Result<DecisionOutcome>> + Send + Sync>;

/// Wraps an async closure as a [`BranchDecisionHook`].
pub fn branch_decision_hook<F, Fut>(f: F) -> BranchDecisionHook
where
    F: Fn(BranchDecisionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = stanchion_core::Result<DecisionOutcome>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Workflow-level configuration shared by the controllers.
#[derive(Clone)]
pub struct WorkflowConfig {
    pub workflow_id: String,
    /// Base attempt configuration; workflow/group/phase/item overrides
    /// layer on top.
    pub attempt: AttemptConfig,
    pub common_config: Option<AttemptOverrides>,
    /// Request-group overrides, keyed by `group_id`.
    pub group_configs: HashMap<String, AttemptOverrides>,
    /// Guard on total phase-decision evaluations.
    pub max_workflow_iterations: u32,
    /// Whole-workflow deadline.
    pub max_timeout: Option<Duration>,
    /// Run every phase simultaneously instead of walking them.
    pub concurrent_phase_execution: bool,
    /// Stop walking when a phase without a decision hook fails.
    pub stop_on_phase_error: bool,
    /// Race concurrent branch groups, cancelling losers.
    pub enable_branch_racing: bool,
    /// Workflow-level state persistence hook.
    pub persistence: Option<StateHook>,
    pub guardrails: Option<MetricsGuardrails>,
}

impl WorkflowConfig {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            attempt: AttemptConfig::default(),
            common_config: None,
            group_configs: HashMap::new(),
            max_workflow_iterations: 1000,
            max_timeout: None,
            concurrent_phase_execution: false,
            stop_on_phase_error: false,
            enable_branch_racing: false,
            persistence: None,
            guardrails: None,
        }
    }

    pub fn attempt(mut self, config: AttemptConfig) -> Self {
        self.attempt = config;
        self
    }

    pub fn common_config(mut self, overrides: AttemptOverrides) -> Self {
        self.common_config = Some(overrides);
        self
    }

    pub fn group_config(
        mut self,
        group_id: impl Into<String>,
        overrides: AttemptOverrides,
    ) -> Self {
        self.group_configs.insert(group_id.into(), overrides);
        self
    }

    pub fn max_workflow_iterations(mut self, n: u32) -> Self {
        self.max_workflow_iterations = n;
        self
    }

    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = Some(timeout);
        self
    }

    pub fn concurrent_phase_execution(mut self, enabled: bool) -> Self {
        self.concurrent_phase_execution = enabled;
        self
    }

    pub fn stop_on_phase_error(mut self, enabled: bool) -> Self {
        self.stop_on_phase_error = enabled;
        self
    }

    pub fn enable_branch_racing(mut self, enabled: bool) -> Self {
        self.enable_branch_racing = enabled;
        self
    }

    pub fn persistence(mut self, hook: StateHook) -> Self {
        self.persistence = Some(hook);
        self
    }

    pub fn guardrails(mut self, guardrails: MetricsGuardrails) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    /// The layered option overlay for one item: workflow keys, then the
    /// item's request-group keys, then phase keys, then item keys.
    pub(crate) fn overrides_for_item(
        &self,
        group_id: Option<&str>,
        phase_overrides: Option<&AttemptOverrides>,
        item_overrides: Option<&AttemptOverrides>,
    ) -> Option<AttemptOverrides> {
        let mut merged = AttemptOverrides::default();
        let mut any = false;
        if let Some(wf) = &self.common_config {
            merged = merged.layered_with(wf);
            any = true;
        }
        if let Some(group) = group_id.and_then(|g| self.group_configs.get(g)) {
            merged = merged.layered_with(group);
            any = true;
        }
        if let Some(phase) = phase_overrides {
            merged = merged.layered_with(phase);
            any = true;
        }
        if let Some(item) = item_overrides {
            merged = merged.layered_with(item);
            any = true;
        }
        (any && !merged.is_empty()).then_some(merged)
    }
}
