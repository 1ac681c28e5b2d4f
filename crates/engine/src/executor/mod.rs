//! Executor collaborator.
//!
//! The engine hands actions to an [`Executor`] after commit and learns
//! about their results through [`ActionCompletion`]s fed back into
//! `Engine::on_action_completed`.

pub mod local;

pub use local::LocalExecutor;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskweave_actions::{ActionContext, ActionError, ActionRegistry};
use uuid::Uuid;

use crate::engine::Outcome;
use crate::spec::JsonMap;

/// Everything needed to run one action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_execution_id: Uuid,
    pub task_execution_id: Uuid,
    pub workflow_execution_id: Uuid,
    pub task_name: String,
    pub action_name: String,
    pub input: JsonMap,
    /// Upper bound on the run, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl ActionRequest {
    pub fn context(&self) -> ActionContext {
        ActionContext::new(
            self.workflow_execution_id,
            self.task_execution_id,
            self.action_execution_id,
            self.task_name.clone(),
        )
        .with_input(self.input.clone())
    }
}

/// Result of one action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCompletion {
    pub action_execution_id: Uuid,
    pub outcome: Outcome,
    pub result: serde_json::Value,
}

/// Runs actions out of band.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Accept an action for execution.
    ///
    /// Returns `false` when the request is rejected; the engine then
    /// records an ERROR outcome for it.
    async fn dispatch(&self, request: ActionRequest) -> bool;
}

/// Run an action from the registry and turn the result into a completion.
///
/// With `dry_run` the action's sample result is returned instead.
pub async fn run_action(
    registry: &ActionRegistry,
    request: &ActionRequest,
    dry_run: bool,
) -> ActionCompletion {
    let ctx = request.context();

    let result = if dry_run {
        registry.test(&request.action_name, &ctx)
    } else {
        match request.timeout {
            Some(secs) => tokio::time::timeout(
                Duration::from_secs(secs),
                registry.run(&request.action_name, &ctx),
            )
            .await
            .unwrap_or(Err(ActionError::Timeout(secs))),
            None => registry.run(&request.action_name, &ctx).await,
        }
    };

    let (outcome, result) = match result {
        Ok(value) => (Outcome::Success, value),
        Err(e) => {
            tracing::debug!(
                action_execution_id = %request.action_execution_id,
                action = %request.action_name,
                error = %e,
                "Action failed"
            );
            (Outcome::Error, e.to_result_value())
        }
    };

    ActionCompletion {
        action_execution_id: request.action_execution_id,
        outcome,
        result,
    }
}
