//! Workflow controllers for the stanchion orchestrator.
//!
//! Composites over the gateway executor, smallest to largest:
//!
//! - [`PhaseExecutor`]: runs one phase's items with workflow/group/phase/item
//!   configuration layering.
//! - [`WorkflowController`]: walks a phase list non-linearly, obeying phase
//!   decisions (continue, skip, jump, replay, terminate, dynamic insertion)
//!   under an iteration guard and optional deadline.
//! - [`BranchWalker`]: drives named branches of phases, each as a scoped
//!   workflow, with concurrent and racing groups.
//! - [`GraphRunner`]: executes a validated DAG of phase, branch,
//!   conditional, parallel-group, and merge nodes.
//!
//! All composites share a [`stanchion_buffer::StableBuffer`] per run, roll
//! their phase metrics up into [`WorkflowMetrics`], and evaluate optional
//! guardrails into the report.

mod branches;
mod controller;
mod graph;
mod model;
mod phase;
mod report;

pub use branches::{BranchRunReport, BranchWalker, BranchesReport, BRANCH_RACE_CANCELLED};
pub use controller::WorkflowController;
pub use graph::{
    ConditionalFn, Edge, EdgeCondition, GraphContext, GraphNode, GraphNodeReport, GraphReport,
    GraphRunner, WorkflowGraph, WorkflowGraphBuilder,
};
pub use model::{
    branch_decision_hook, phase_decision_hook, sync_phase_decision_hook, Branch,
    BranchDecisionContext, BranchDecisionHook, Decision, DecisionOutcome, Phase,
    PhaseDecisionContext, PhaseDecisionHook, PhaseItem, WorkflowConfig,
};
pub use phase::{PhaseExecutor, PhaseReport};
pub use report::{WorkflowMetrics, WorkflowReport};
