//! Task graph resolver.
//!
//! A pure function from a snapshot of task states to the set of tasks
//! that can now be triggered. The snapshot is indexed by node id, so the
//! result does not depend on the order tasks were loaded in.

use tracing::{debug, warn};

use crate::db::models::{TaskExecution, TaskState};
use crate::spec::{JsonMap, NodeId, TaskGraph, TransitionKind, WorkflowSpec};

use super::evaluator::Evaluator;
use super::join::{evaluate_join, evaluate_requires, EdgeStatus, Readiness};

/// What the resolver needs to know about one task execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub triggered: bool,
    pub next_tasks: Vec<String>,
}

impl From<&TaskExecution> for TaskSnapshot {
    fn from(task: &TaskExecution) -> Self {
        Self {
            state: task.state,
            triggered: task.triggered,
            next_tasks: task.next_tasks.clone(),
        }
    }
}

/// Task states of one workflow execution, by node.
///
/// `None` marks a node with no task execution (outside the reachable
/// subgraph).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    tasks: Vec<Option<TaskSnapshot>>,
}

impl Snapshot {
    /// An empty snapshot for `len` nodes.
    pub fn new(len: usize) -> Self {
        Self {
            tasks: vec![None; len],
        }
    }

    /// Index task executions by node, in any order.
    pub fn from_tasks<'a, I>(graph: &TaskGraph, tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a TaskExecution>,
    {
        let mut snapshot = Self::new(graph.len());
        for task in tasks {
            if let Some(id) = graph.node_id(&task.name) {
                snapshot.set(id, TaskSnapshot::from(task));
            }
        }
        snapshot
    }

    pub fn get(&self, id: NodeId) -> Option<&TaskSnapshot> {
        self.tasks.get(id).and_then(Option::as_ref)
    }

    pub fn set(&mut self, id: NodeId, task: TaskSnapshot) {
        self.tasks[id] = Some(task);
    }

    fn state(&self, id: NodeId) -> Option<TaskState> {
        self.get(id).map(|t| t.state)
    }
}

/// Tasks whose status changes this round, each in topological order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Ready to trigger.
    pub runnable: Vec<NodeId>,
    /// Newly waiting on a join threshold.
    pub waiting: Vec<NodeId>,
    /// Can never run; includes cascades through other skipped tasks.
    pub skipped: Vec<NodeId>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.runnable.is_empty() && self.waiting.is_empty() && self.skipped.is_empty()
    }
}

/// Compute which untriggered tasks can run, wait or must be skipped.
pub fn resolve(spec: &WorkflowSpec, graph: &TaskGraph, snapshot: &Snapshot) -> Resolution {
    let mut view = snapshot.clone();
    let mut resolution = Resolution::default();

    for &id in graph.topo_order() {
        let Some(task) = view.get(id) else {
            continue;
        };
        if task.triggered || !matches!(task.state, TaskState::Idle | TaskState::Waiting) {
            continue;
        }
        let was_waiting = task.state == TaskState::Waiting;

        let readiness = readiness(spec, graph, &view, id);
        match readiness {
            Readiness::Ready => resolution.runnable.push(id),
            Readiness::Waiting if !was_waiting => resolution.waiting.push(id),
            Readiness::Unreachable => {
                resolution.skipped.push(id);
                if let Some(mut skipped) = view.get(id).cloned() {
                    skipped.state = TaskState::Skipped;
                    view.set(id, skipped);
                }
            }
            Readiness::Waiting | Readiness::Blocked => {}
        }
        debug!(task = %graph.node(id).name, ?readiness, "Resolved task");
    }

    resolution
}

/// Readiness of a single node against the current view.
fn readiness(spec: &WorkflowSpec, graph: &TaskGraph, view: &Snapshot, id: NodeId) -> Readiness {
    let node = graph.node(id);

    let requires = evaluate_requires(node.requires.iter().map(|r| view.state(*r)));

    let sources: Vec<EdgeStatus> = node
        .inbound_sources
        .iter()
        .map(|src| {
            let source = view.get(*src);
            let selected = source.is_some_and(|s| s.next_tasks.iter().any(|n| *n == node.name));
            EdgeStatus::of(source.map(|s| s.state), selected)
        })
        .collect();
    let join = evaluate_join(spec.tasks[id].join, &sources);

    requires.and(join)
}

/// Outbound transitions that fire for a task finishing in `state`.
///
/// Returns the selected successor names, deduplicated in declaration
/// order, and whether an `on_error` edge fired for an ERROR. Guards see
/// the task's outbound context; a guard that fails to evaluate counts as
/// false.
pub fn evaluate_transitions(
    graph: &TaskGraph,
    id: NodeId,
    state: TaskState,
    outbound: &JsonMap,
    evaluator: &dyn Evaluator,
) -> (Vec<String>, bool) {
    let mut next = Vec::new();
    let mut error_handled = false;

    for edge in graph.outbound_edges(id) {
        let applies = match (edge.kind, state) {
            (TransitionKind::OnSuccess, TaskState::Success)
            | (TransitionKind::OnError, TaskState::Error)
            | (TransitionKind::OnComplete, TaskState::Success | TaskState::Error) => true,
            _ => false,
        };
        if !applies {
            continue;
        }

        let guard_passed = match &edge.guard {
            None => true,
            Some(guard) => evaluator.evaluate_condition(guard, outbound).unwrap_or_else(|e| {
                warn!(
                    task = %graph.node(id).name,
                    guard = %guard,
                    error = %e,
                    "Transition guard failed to evaluate"
                );
                false
            }),
        };
        if !guard_passed {
            continue;
        }

        if edge.kind == TransitionKind::OnError {
            error_handled = true;
        }
        let target = &graph.node(edge.target).name;
        if !next.contains(target) {
            next.push(target.clone());
        }
    }

    (next, error_handled)
}
