//! Workflow definitions.
//!
//! - **Types**: the in-memory `WorkflowSpec` / `TaskSpec` model
//! - **Graph**: compiled adjacency structure and definition checks
//! - **Parser**: YAML loading

pub mod graph;
pub mod parser;
pub mod types;

pub use graph::{Edge, NodeId, TaskGraph, TaskNode};
pub use parser::{parse_workflow, parse_workflow_file};
pub use types::{
    InputParam, JsonMap, Join, RepeatSpec, RetrySpec, TaskSpec, Transition, TransitionKind,
    WithItemsSpec, WorkflowSpec,
};

use crate::error::EngineResult;

/// A workflow spec together with its compiled graph.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub spec: WorkflowSpec,
    pub graph: TaskGraph,
}

impl WorkflowDefinition {
    /// Compile a spec.
    pub fn compile(spec: WorkflowSpec) -> EngineResult<Self> {
        let graph = TaskGraph::build(&spec)?;
        Ok(Self { spec, graph })
    }

    /// Task spec for a node.
    pub fn task(&self, id: NodeId) -> &TaskSpec {
        &self.spec.tasks[id]
    }
}
