//! Workflow graph: DAG construction, validation, and execution.
//!
//! Graphs are built with [`WorkflowGraphBuilder`]; construction is the only
//! failure point. `build()` checks node references, requires exactly one
//! entry, auto-detects exits (nodes with no outgoing edges), and runs DFS
//! cycle detection with a recursion stack unless `enforce_dag(false)`.

use crate::branches::BranchWalker;
use crate::controller::{next_run_id, WorkflowController};
use crate::model::{Branch, Phase, WorkflowConfig};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use stanchion_buffer::StableBuffer;
use stanchion_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Read-only context handed to conditional evaluators and edge conditions.
#[derive(Debug, Clone)]
pub struct GraphContext {
    /// Snapshot of the shared buffer.
    pub buffer: Value,
    /// Per-node outcome summaries, keyed by node id.
    pub results: HashMap<String, Value>,
}

/// Callable choosing the next node id at a conditional node.
pub type ConditionalFn = Arc<dyn Fn(&GraphContext) -> String + Send + Sync>;

/// Edge predicate.
pub type EdgeCondition = Arc<dyn Fn(&GraphContext) -> bool + Send + Sync>;

/// Node variants.
#[derive(Clone)]
pub enum GraphNode {
    Phase(Phase),
    Branch(Branch),
    Conditional { evaluate: ConditionalFn },
    ParallelGroup { members: Vec<String> },
    Merge { wait_for: Vec<String> },
}

impl GraphNode {
    fn kind(&self) -> &'static str {
        match self {
            GraphNode::Phase(_) => "phase",
            GraphNode::Branch(_) => "branch",
            GraphNode::Conditional { .. } => "conditional",
            GraphNode::ParallelGroup { .. } => "parallel_group",
            GraphNode::Merge { .. } => "merge",
        }
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GraphNode::{}", self.kind())
    }
}

/// A directed edge with an optional condition, weight, and label.
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
    pub weight: Option<f64>,
    pub label: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
            weight: None,
            label: None,
        }
    }

    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&GraphContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.condition.is_some())
            .field("label", &self.label)
            .finish()
    }
}

/// A validated workflow graph.
#[derive(Debug)]
pub struct WorkflowGraph {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<Edge>,
    entry: String,
    exits: Vec<String>,
}

impl WorkflowGraph {
    pub fn builder() -> WorkflowGraphBuilder {
        WorkflowGraphBuilder::new()
    }

    pub fn entry_point(&self) -> &str {
        &self.entry
    }

    pub fn exit_points(&self) -> &[String] {
        &self.exits
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Outgoing edges of a node, in declared order.
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }
}

/// Builder for [`WorkflowGraph`].
pub struct WorkflowGraphBuilder {
    nodes: Vec<(String, GraphNode)>,
    edges: Vec<Edge>,
    entry: Option<String>,
    exits: Vec<String>,
    enforce_dag: bool,
}

impl Default for WorkflowGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowGraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
            exits: Vec::new(),
            enforce_dag: true,
        }
    }

    /// Adds a phase node; the node id is the phase id.
    pub fn add_phase(mut self, phase: Phase) -> Self {
        self.nodes.push((phase.id.clone(), GraphNode::Phase(phase)));
        self
    }

    /// Adds a branch node; the node id is the branch id.
    pub fn add_branch(mut self, branch: Branch) -> Self {
        self.nodes
            .push((branch.id.clone(), GraphNode::Branch(branch)));
        self
    }

    /// Adds a conditional node whose evaluator names the next node.
    pub fn add_conditional<F>(mut self, id: impl Into<String>, evaluate: F) -> Self
    where
        F: Fn(&GraphContext) -> String + Send + Sync + 'static,
    {
        self.nodes.push((
            id.into(),
            GraphNode::Conditional {
                evaluate: Arc::new(evaluate),
            },
        ));
        self
    }

    /// Adds a parallel group over previously added member nodes.
    pub fn add_parallel_group(
        mut self,
        id: impl Into<String>,
        members: Vec<String>,
    ) -> Self {
        self.nodes
            .push((id.into(), GraphNode::ParallelGroup { members }));
        self
    }

    /// Adds a merge node waiting for the listed nodes to have executed.
    pub fn add_merge(mut self, id: impl Into<String>, wait_for: Vec<String>) -> Self {
        self.nodes.push((id.into(), GraphNode::Merge { wait_for }));
        self
    }

    /// Adds an unconditioned edge.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Adds an arbitrary edge.
    pub fn add_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Names the single entry node.
    pub fn entry_point(mut self, id: impl Into<String>) -> Self {
        self.entry = Some(id.into());
        self
    }

    /// Names explicit exit nodes; when omitted, exits are auto-detected as
    /// nodes with no outgoing edges.
    pub fn exit_points(mut self, ids: Vec<String>) -> Self {
        self.exits = ids;
        self
    }

    /// Disables the DAG check (cycles become the caller's responsibility;
    /// the iteration guard still bounds execution).
    pub fn enforce_dag(mut self, enforce: bool) -> Self {
        self.enforce_dag = enforce;
        self
    }

    /// Validates and builds the graph.
    pub fn build(self) -> Result<WorkflowGraph> {
        let mut nodes = HashMap::new();
        for (id, node) in &self.nodes {
            if nodes.insert(id.clone(), node.clone()).is_some() {
                return Err(Error::GraphValidation(format!("duplicate node id '{id}'")));
            }
        }

        let entry = self
            .entry
            .clone()
            .ok_or_else(|| Error::GraphValidation("no entry point named".to_string()))?;
        if !nodes.contains_key(&entry) {
            return Err(Error::GraphValidation(format!(
                "entry point '{entry}' is not a node"
            )));
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !nodes.contains_key(end) {
                    return Err(Error::GraphValidation(format!(
                        "edge references unknown node '{end}'"
                    )));
                }
            }
        }
        for (id, node) in &nodes {
            let referenced: &[String] = match node {
                GraphNode::ParallelGroup { members } => members,
                GraphNode::Merge { wait_for } => wait_for,
                _ => &[],
            };
            for member in referenced {
                if !nodes.contains_key(member) {
                    return Err(Error::GraphValidation(format!(
                        "node '{id}' references unknown node '{member}'"
                    )));
                }
            }
        }

        if self.enforce_dag {
            if let Some(cycle) = find_cycle(&self.nodes, &self.edges) {
                return Err(Error::GraphValidation(format!(
                    "cycle detected: {}",
                    cycle.join(" -> ")
                )));
            }
        }

        let exits = if self.exits.is_empty() {
            self.nodes
                .iter()
                .filter(|(id, _)| !self.edges.iter().any(|e| &e.from == id))
                .map(|(id, _)| id.clone())
                .collect()
        } else {
            self.exits.clone()
        };

        Ok(WorkflowGraph {
            nodes,
            edges: self.edges,
            entry,
            exits,
        })
    }
}

/// DFS with a recursion stack; returns the cycle as the path through the
/// stack, closed on the repeated node.
fn find_cycle(nodes: &[(String, GraphNode)], edges: &[Edge]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut marks: HashMap<&str, Mark> = nodes
        .iter()
        .map(|(id, _)| (id.as_str(), Mark::Unvisited))
        .collect();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::InStack);
        stack.push(node);
        for &next in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            match marks.get(next).copied().unwrap_or(Mark::Unvisited) {
                Mark::InStack => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = dfs(next, adjacency, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for (id, _) in nodes {
        if marks.get(id.as_str()).copied() == Some(Mark::Unvisited) {
            let mut stack = Vec::new();
            if let Some(cycle) = dfs(id.as_str(), &adjacency, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Report for one executed graph node.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNodeReport {
    pub node_id: String,
    pub kind: String,
    pub success: bool,
    pub detail: Value,
    pub execution_time_ms: u64,
}

/// The result of one graph run.
#[derive(Debug, Clone, Serialize)]
pub struct GraphReport {
    pub workflow_id: String,
    pub success: bool,
    /// Node reports in execution order.
    pub executed: Vec<GraphNodeReport>,
    pub terminated_early: bool,
    pub termination_reason: Option<String>,
    pub execution_time_ms: u64,
}

/// Executes validated workflow graphs.
#[derive(Clone)]
pub struct GraphRunner {
    controller: WorkflowController,
}

impl GraphRunner {
    pub fn new(controller: WorkflowController) -> Self {
        Self { controller }
    }

    /// Topologically walks the graph from its entry point.
    pub async fn run(&self, graph: &WorkflowGraph, config: &WorkflowConfig) -> GraphReport {
        match config.max_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drive(graph, config)).await {
                    Ok(report) => report,
                    Err(_) => GraphReport {
                        workflow_id: config.workflow_id.clone(),
                        success: false,
                        executed: Vec::new(),
                        terminated_early: true,
                        termination_reason: Some(format!(
                            "workflow timed out after {}ms",
                            limit.as_millis()
                        )),
                        execution_time_ms: limit.as_millis() as u64,
                    },
                }
            }
            None => self.drive(graph, config).await,
        }
    }

    async fn drive(&self, graph: &WorkflowGraph, config: &WorkflowConfig) -> GraphReport {
        let run_started = Instant::now();
        let run_id = next_run_id();
        let buffer = Arc::new(StableBuffer::new());

        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(graph.entry_point().to_string());

        let mut executed: HashMap<String, bool> = HashMap::new();
        let mut results: HashMap<String, Value> = HashMap::new();
        let mut reports: Vec<GraphNodeReport> = Vec::new();
        let mut terminated_early = false;
        let mut termination_reason: Option<String> = None;
        let mut iterations = 0u32;

        'walk: while let Some(node_id) = queue.pop_front() {
            iterations += 1;
            if iterations > config.max_workflow_iterations {
                terminated_early = true;
                termination_reason = Some(format!(
                    "iteration cap of {} reached",
                    config.max_workflow_iterations
                ));
                break;
            }
            if executed.contains_key(&node_id) {
                continue;
            }
            let Some(node) = graph.node(&node_id) else {
                terminated_early = true;
                termination_reason = Some(format!("node '{node_id}' not found"));
                break;
            };

            let node_started = Instant::now();
            let mut explicit_next: Option<String> = None;

            let (success, detail) = match node {
                GraphNode::Merge { wait_for } => {
                    let ready = wait_for.iter().all(|dep| executed.contains_key(dep));
                    if !ready {
                        if queue.is_empty() {
                            terminated_early = true;
                            termination_reason = Some(format!(
                                "merge '{node_id}' waits on nodes that will never execute"
                            ));
                            break 'walk;
                        }
                        // Not ready yet: revisit after the rest of the
                        // frontier makes progress.
                        queue.push_back(node_id);
                        continue;
                    }
                    (true, json!({"waited_for": wait_for}))
                }
                GraphNode::Conditional { evaluate } => {
                    let context = GraphContext {
                        buffer: buffer.read().await,
                        results: results.clone(),
                    };
                    let chosen = evaluate(&context);
                    let outgoing = graph.outgoing(&node_id);
                    if outgoing.iter().any(|edge| edge.to == chosen) {
                        explicit_next = Some(chosen.clone());
                        (true, json!({"chose": chosen}))
                    } else {
                        terminated_early = true;
                        termination_reason = Some(format!(
                            "conditional '{node_id}' chose '{chosen}', which is not a successor"
                        ));
                        reports.push(GraphNodeReport {
                            node_id: node_id.clone(),
                            kind: node.kind().to_string(),
                            success: false,
                            detail: json!({"chose": chosen}),
                            execution_time_ms: node_started.elapsed().as_millis() as u64,
                        });
                        break 'walk;
                    }
                }
                GraphNode::Phase(phase) => {
                    let report = self
                        .controller
                        .executor()
                        .execute(phase, reports.len(), config, &buffer, &run_id)
                        .await;
                    let success = report.success;
                    (success, crate::phase::report_to_value(&report))
                }
                GraphNode::Branch(branch) => {
                    let walker = BranchWalker::new(self.controller.clone());
                    let mut sub = config.clone();
                    sub.max_timeout = None;
                    let report = walker
                        .run_with_buffer(vec![branch.clone()], &sub, Arc::clone(&buffer))
                        .await;
                    let success = report.success;
                    (
                        success,
                        serde_json::to_value(&report).unwrap_or(Value::Null),
                    )
                }
                GraphNode::ParallelGroup { members } => {
                    let mut futures = Vec::new();
                    let mut member_ids = Vec::new();
                    let mut unsupported: Option<String> = None;
                    for member in members {
                        match graph.node(member) {
                            Some(GraphNode::Phase(phase)) => {
                                member_ids.push(member.clone());
                                let phase = phase.clone();
                                let controller = self.controller.clone();
                                let config = config.clone();
                                let buffer = Arc::clone(&buffer);
                                let run_id = run_id.clone();
                                let index = reports.len() + member_ids.len();
                                futures.push(async move {
                                    let report = controller
                                        .executor()
                                        .execute(&phase, index, &config, &buffer, &run_id)
                                        .await;
                                    (report.success, crate::phase::report_to_value(&report))
                                });
                            }
                            _ => {
                                unsupported = Some(member.clone());
                                break;
                            }
                        }
                    }
                    if let Some(member) = unsupported {
                        terminated_early = true;
                        termination_reason = Some(format!(
                            "parallel group '{node_id}' member '{member}' is not an executable phase"
                        ));
                        break 'walk;
                    }

                    let outcomes = join_all(futures).await;
                    let group_ok = outcomes.iter().all(|(ok, _)| *ok);
                    for (member, (ok, detail)) in member_ids.iter().zip(outcomes) {
                        executed.insert(member.clone(), ok);
                        results.insert(member.clone(), json!({"success": ok}));
                        reports.push(GraphNodeReport {
                            node_id: member.clone(),
                            kind: "phase".to_string(),
                            success: ok,
                            detail,
                            execution_time_ms: 0,
                        });
                    }
                    (group_ok, json!({"members": member_ids}))
                }
            };

            executed.insert(node_id.clone(), success);
            results.insert(node_id.clone(), json!({"success": success}));
            reports.push(GraphNodeReport {
                node_id: node_id.clone(),
                kind: node.kind().to_string(),
                success,
                detail,
                execution_time_ms: node_started.elapsed().as_millis() as u64,
            });

            if let Some(next) = explicit_next {
                queue.push_back(next);
                continue;
            }

            // Edge selection: conditioned edges in declared order, first
            // truthy wins; otherwise every unconditioned edge fans out.
            let outgoing = graph.outgoing(&node_id);
            let context = GraphContext {
                buffer: buffer.read().await,
                results: results.clone(),
            };
            let mut chosen: Vec<String> = Vec::new();
            for edge in &outgoing {
                if let Some(condition) = &edge.condition {
                    if condition(&context) {
                        chosen.push(edge.to.clone());
                        break;
                    }
                }
            }
            if chosen.is_empty() {
                chosen = outgoing
                    .iter()
                    .filter(|edge| edge.condition.is_none())
                    .map(|edge| edge.to.clone())
                    .collect();
            }
            queue.extend(chosen);
        }

        let success = !terminated_early && reports.iter().all(|r| r.success);
        GraphReport {
            workflow_id: config.workflow_id.clone(),
            success,
            executed: reports,
            terminated_early,
            termination_reason,
            execution_time_ms: run_started.elapsed().as_millis() as u64,
        }
    }
}
