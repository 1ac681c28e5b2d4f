//! Workflow execution record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spec::{JsonMap, WorkflowSpec};

/// Workflow execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Idle,
    Running,
    Success,
    Error,
    Paused,
    Cancelled,
}

impl WorkflowState {
    /// SUCCESS, ERROR and CANCELLED are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Paused => "PAUSED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Link from a nested execution to the task that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub workflow_execution_id: Uuid,
    pub task_execution_id: Uuid,
    pub action_execution_id: Uuid,
}

/// One run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
    pub state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_info: Option<String>,

    /// Input as supplied, with declared defaults filled in.
    pub input: JsonMap,

    /// Context visible to start tasks.
    pub context: JsonMap,

    /// Evaluated output, populated on SUCCESS.
    #[serde(default)]
    pub output: JsonMap,

    /// Requested target task for requirement graphs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_task: Option<String>,

    /// Definition the execution runs, kept for durability.
    pub spec: WorkflowSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentLink>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(id: Uuid, spec: WorkflowSpec, input: JsonMap, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            state: WorkflowState::Idle,
            state_info: None,
            input,
            context: JsonMap::new(),
            output: JsonMap::new(),
            target_task: None,
            spec,
            parent: None,
            created_at: now,
            updated_at: now,
        }
    }
}
