//! Action execution error types.

use thiserror::Error;

/// Errors that can occur while resolving or running an action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Action not found in registry.
    #[error("Action not found: {0}")]
    NotFound(String),

    /// Input did not match the action's declared parameters.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The action ran and reported a failure.
    #[error("Action failed: {message}")]
    Failed {
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Action execution timed out.
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl ActionError {
    /// Shorthand for a failure carrying only a message.
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed {
            message: message.into(),
            data: None,
        }
    }

    /// The value recorded as the action execution's output.
    ///
    /// Structured failure data wins over the rendered message.
    pub fn to_result_value(&self) -> serde_json::Value {
        match self {
            ActionError::Failed {
                data: Some(data), ..
            } => data.clone(),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        ActionError::Json(e.to_string())
    }
}
