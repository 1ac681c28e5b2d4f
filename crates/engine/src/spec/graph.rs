//! Task graph compilation.
//!
//! Compiles a [`WorkflowSpec`] once into an arena of nodes with
//! index-based edges. Node ids are positions in `WorkflowSpec::tasks`.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{EngineError, EngineResult};

use super::types::{Join, TransitionKind, WorkflowSpec};

/// Index of a task in the arena.
pub type NodeId = usize;

/// A transition edge between two tasks.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: TransitionKind,
    pub guard: Option<String>,
}

/// A compiled task node.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: NodeId,
    pub name: String,
    /// Tasks named in `requires`.
    pub requires: Vec<NodeId>,
    /// Tasks whose `requires` name this task.
    pub dependents: Vec<NodeId>,
    /// Indices into the edge list, transitions leaving this task.
    pub outbound: Vec<usize>,
    /// Indices into the edge list, transitions entering this task.
    pub inbound: Vec<usize>,
    /// Distinct source tasks of inbound transitions, in declaration order.
    pub inbound_sources: Vec<NodeId>,
}

impl TaskNode {
    /// A start task has no requirements and no inbound transitions.
    pub fn is_start(&self) -> bool {
        self.requires.is_empty() && self.inbound.is_empty()
    }
}

/// Adjacency structure over a workflow's tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    edges: Vec<Edge>,
    index: HashMap<String, NodeId>,
    topo: Vec<NodeId>,
    position: Vec<usize>,
}

impl TaskGraph {
    /// Compile and validate the graph.
    pub fn build(spec: &WorkflowSpec) -> EngineResult<Self> {
        if spec.tasks.is_empty() {
            return Err(EngineError::Definition(format!(
                "Workflow '{}' has no tasks",
                spec.name
            )));
        }

        let mut index = HashMap::with_capacity(spec.tasks.len());
        for (id, task) in spec.tasks.iter().enumerate() {
            if index.insert(task.name.clone(), id).is_some() {
                return Err(EngineError::Definition(format!(
                    "Duplicate task name: {}",
                    task.name
                )));
            }
        }

        let lookup = |owner: &str, name: &str, field: &str| -> EngineResult<NodeId> {
            index.get(name).copied().ok_or_else(|| {
                EngineError::Definition(format!(
                    "Task '{}' references unknown task '{}' in '{}'",
                    owner, name, field
                ))
            })
        };

        let mut nodes: Vec<TaskNode> = spec
            .tasks
            .iter()
            .enumerate()
            .map(|(id, task)| TaskNode {
                id,
                name: task.name.clone(),
                requires: Vec::new(),
                dependents: Vec::new(),
                outbound: Vec::new(),
                inbound: Vec::new(),
                inbound_sources: Vec::new(),
            })
            .collect();
        let mut edges = Vec::new();

        for (id, task) in spec.tasks.iter().enumerate() {
            match (&task.action, &task.workflow) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(EngineError::Definition(format!(
                        "Task '{}' must name exactly one of 'action' or 'workflow'",
                        task.name
                    )));
                }
            }

            for req in &task.requires {
                let req_id = lookup(&task.name, req, "requires")?;
                if !nodes[id].requires.contains(&req_id) {
                    nodes[id].requires.push(req_id);
                    nodes[req_id].dependents.push(id);
                }
            }

            for (kind, transition) in task.transitions() {
                let field = match kind {
                    TransitionKind::OnSuccess => "on_success",
                    TransitionKind::OnError => "on_error",
                    TransitionKind::OnComplete => "on_complete",
                };
                let target = lookup(&task.name, &transition.task, field)?;
                let edge = edges.len();
                edges.push(Edge {
                    source: id,
                    target,
                    kind,
                    guard: transition.when.clone(),
                });
                nodes[id].outbound.push(edge);
                nodes[target].inbound.push(edge);
                if !nodes[target].inbound_sources.contains(&id) {
                    nodes[target].inbound_sources.push(id);
                }
            }
        }

        for (id, task) in spec.tasks.iter().enumerate() {
            if let Some(Join::Count(n)) = task.join {
                let sources = nodes[id].inbound_sources.len();
                if n == 0 || n > sources {
                    return Err(EngineError::Definition(format!(
                        "Task '{}' joins on {} branches but has {} inbound",
                        task.name, n, sources
                    )));
                }
            }
        }

        let topo = topological_order(&nodes, &edges).map_err(|cycle| {
            EngineError::Definition(format!(
                "Workflow '{}' contains a cycle through tasks: {}",
                spec.name,
                cycle.join(", ")
            ))
        })?;

        let mut position = vec![0; nodes.len()];
        for (pos, id) in topo.iter().enumerate() {
            position[*id] = pos;
        }

        Ok(Self {
            nodes,
            edges,
            index,
            topo,
            position,
        })
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn edge(&self, idx: usize) -> &Edge {
        &self.edges[idx]
    }

    /// Look up a node by task name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn inbound_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes[id].inbound.iter().map(move |e| &self.edges[*e])
    }

    pub fn outbound_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes[id].outbound.iter().map(move |e| &self.edges[*e])
    }

    /// Nodes in topological order (predecessors first).
    pub fn topo_order(&self) -> &[NodeId] {
        &self.topo
    }

    /// Position of a node in the topological order.
    pub fn topo_position(&self, id: NodeId) -> usize {
        self.position[id]
    }

    pub fn start_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.topo.iter().copied().filter(|id| self.nodes[*id].is_start())
    }

    /// The subgraph to materialize for an execution, in topological order.
    ///
    /// Without a target this is everything reachable from the start tasks.
    /// With a target it is the target plus the closure of its `requires`.
    pub fn reachable(&self, target: Option<&str>) -> EngineResult<Vec<NodeId>> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        match target {
            Some(name) => {
                let id = self.node_id(name).ok_or_else(|| {
                    EngineError::InvalidInput(format!("Unknown target task: {}", name))
                })?;
                queue.push_back(id);
                while let Some(id) = queue.pop_front() {
                    if seen.insert(id) {
                        queue.extend(self.nodes[id].requires.iter().copied());
                    }
                }
            }
            None => {
                queue.extend(self.start_nodes());
                while let Some(id) = queue.pop_front() {
                    if seen.insert(id) {
                        let node = &self.nodes[id];
                        queue.extend(node.dependents.iter().copied());
                        queue.extend(node.outbound.iter().map(|e| self.edges[*e].target));
                    }
                }
            }
        }

        Ok(self
            .topo
            .iter()
            .copied()
            .filter(|id| seen.contains(id))
            .collect())
    }
}

/// Kahn's algorithm over requires and transition edges.
///
/// Ties are broken by declaration order. On a cycle returns the names of
/// the tasks that could not be ordered.
fn topological_order(nodes: &[TaskNode], edges: &[Edge]) -> Result<Vec<NodeId>, Vec<String>> {
    let mut successors: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];

    for node in nodes {
        for req in &node.requires {
            successors[*req].push(node.id);
            in_degree[node.id] += 1;
        }
    }
    for edge in edges {
        successors[edge.source].push(edge.target);
        in_degree[edge.target] += 1;
    }

    let mut ready: std::collections::BTreeSet<NodeId> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for succ in &successors[id] {
            in_degree[*succ] -= 1;
            if in_degree[*succ] == 0 {
                ready.insert(*succ);
            }
        }
    }

    if order.len() == nodes.len() {
        Ok(order)
    } else {
        Err(nodes
            .iter()
            .filter(|n| in_degree[n.id] > 0)
            .map(|n| n.name.clone())
            .collect())
    }
}
