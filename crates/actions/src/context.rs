//! Execution context handed to actions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context passed to an action when it runs.
///
/// Carries the identity of the action execution being served and the
/// task input after expression evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionContext {
    /// Owning workflow execution.
    pub workflow_execution_id: Uuid,

    /// Owning task execution.
    pub task_execution_id: Uuid,

    /// The action execution this run reports into.
    pub action_execution_id: Uuid,

    /// Name of the task that delegated to the action.
    pub task_name: String,

    /// Evaluated input parameters.
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
}

impl ActionContext {
    /// Create a new context with empty input.
    pub fn new(
        workflow_execution_id: Uuid,
        task_execution_id: Uuid,
        action_execution_id: Uuid,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            workflow_execution_id,
            task_execution_id,
            action_execution_id,
            task_name: task_name.into(),
            input: serde_json::Map::new(),
        }
    }

    /// Replace the input parameters.
    pub fn with_input(mut self, input: serde_json::Map<String, serde_json::Value>) -> Self {
        self.input = input;
        self
    }

    /// Get an input parameter.
    pub fn get_input(&self, name: &str) -> Option<&serde_json::Value> {
        self.input.get(name)
    }

    /// Get an input parameter rendered as a string.
    pub fn get_input_str(&self, name: &str) -> Option<String> {
        self.input.get(name).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => v.to_string(),
        })
    }
}
