//! Action execution record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spec::JsonMap;

/// Action execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Running,
    Success,
    Error,
    Cancelled,
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// One attempt of a task, or one with-items element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: Uuid,
    pub task_execution_id: Uuid,
    pub workflow_execution_id: Uuid,

    /// Action name, or workflow name when `is_workflow` is set.
    pub action_name: String,
    #[serde(default)]
    pub is_workflow: bool,
    #[serde(default)]
    pub is_sync: bool,

    /// Task input after expression evaluation.
    pub input: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub state: ActionState,

    /// A terminal result has been durably recorded.
    #[serde(default)]
    pub accepted: bool,

    /// With-items element index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    /// Task attempt this action belongs to.
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionExecution {
    pub fn new(
        task_execution_id: Uuid,
        workflow_execution_id: Uuid,
        action_name: impl Into<String>,
        input: JsonMap,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_execution_id,
            workflow_execution_id,
            action_name: action_name.into(),
            is_workflow: false,
            is_sync: false,
            input,
            output: None,
            state: ActionState::Running,
            accepted: false,
            index: None,
            attempt,
            created_at: now,
            updated_at: now,
        }
    }
}
