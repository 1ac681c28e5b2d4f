//! Side effects decided inside a transaction.
//!
//! Engine operations never dispatch work while holding a workflow lock.
//! They collect commands into a [`DispatchPlan`] that the orchestrator
//! executes after commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{ParentLink, WorkflowState};
use crate::executor::ActionRequest;
use crate::spec::JsonMap;

use super::policies::Outcome;

/// One post-commit side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Hand an action to the executor, or run it inline when `sync`.
    RunAction { request: ActionRequest, sync: bool },
    /// Start a nested workflow execution for a task.
    StartSubWorkflow {
        parent: ParentLink,
        workflow_name: String,
        input: JsonMap,
        env: JsonMap,
    },
    /// Release a DELAYED task at `fire_at`.
    ScheduleDelay {
        task_execution_id: Uuid,
        fire_at: DateTime<Utc>,
    },
    /// Complete the parent task's action with a nested execution's result.
    NotifyParent {
        action_execution_id: Uuid,
        outcome: Outcome,
        result: serde_json::Value,
    },
    /// Cancel a nested workflow execution.
    CancelWorkflow { workflow_execution_id: Uuid },
    /// Publish a workflow state change to subscribers.
    Announce {
        workflow_execution_id: Uuid,
        state: WorkflowState,
    },
}

/// Commands produced by one committed operation, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchPlan {
    pub commands: Vec<Command>,
}

impl DispatchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Number of actions handed to the executor or run inline.
    pub fn action_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::RunAction { .. }))
            .count()
    }
}

impl IntoIterator for DispatchPlan {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
