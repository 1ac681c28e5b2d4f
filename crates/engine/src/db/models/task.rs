//! Task execution record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spec::JsonMap;

/// Task execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created, or released for (re-)dispatch.
    Idle,
    /// Blocked by a backoff or wait-before timer.
    Delayed,
    /// Blocked by an unmet join threshold.
    Waiting,
    Running,
    Success,
    Error,
    Skipped,
}

impl TaskState {
    /// SUCCESS, ERROR and SKIPPED are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Skipped)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Delayed => "DELAYED",
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Skipped => "SKIPPED",
        };
        write!(f, "{}", s)
    }
}

/// Fan-out bookkeeping for a with-items attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithItemsProgress {
    /// Evaluated collection.
    pub items: Vec<serde_json::Value>,
    /// Next index to dispatch.
    pub next_index: usize,
    /// Element actions in flight.
    pub running: usize,
    /// Per-index results, `None` until the element completes.
    pub results: Vec<Option<serde_json::Value>>,
    /// Set once any element fails.
    pub failed: bool,
}

/// Retry, repeat and timer counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeContext {
    /// Retries consumed, starting at -1.
    pub retry_no: i64,
    /// Repeat position, starting at -1.
    pub iteration_no: i64,
    /// `retry_no` when the current repeat iteration began.
    pub iteration_retry_start: i64,
    /// Number of dispatches so far.
    pub attempts: u32,
    /// The wait-before timer has elapsed.
    #[serde(default)]
    pub wait_before_done: bool,
    /// When the current DELAYED period ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_items: Option<WithItemsProgress>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            retry_no: -1,
            iteration_no: -1,
            iteration_retry_start: -1,
            attempts: 0,
            wait_before_done: false,
            delay_until: None,
            with_items: None,
        }
    }
}

/// One task of a workflow execution.
///
/// Retries and repeats reuse the same record; each attempt is a new
/// ActionExecution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub workflow_execution_id: Uuid,
    pub name: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_info: Option<String>,

    /// Set once the graph resolver has released the task.
    #[serde(default)]
    pub triggered: bool,

    /// Context visible on entry.
    #[serde(default)]
    pub in_context: JsonMap,

    /// Published output: `{"task": {name: result}, ...published}`.
    #[serde(default)]
    pub output: JsonMap,

    /// Raw result of the last attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default)]
    pub runtime_context: RuntimeContext,

    /// Successor tasks whose inbound transition fired, set on completion.
    #[serde(default)]
    pub next_tasks: Vec<String>,

    /// An `on_error` transition fired for this task's ERROR.
    #[serde(default)]
    pub error_handled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskExecution {
    pub fn new(workflow_execution_id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_execution_id,
            name: name.into(),
            state: TaskState::Idle,
            state_info: None,
            triggered: false,
            in_context: JsonMap::new(),
            output: JsonMap::new(),
            result: None,
            runtime_context: RuntimeContext::default(),
            next_tasks: Vec::new(),
            error_handled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_context_counters_start_negative() {
        let rc = RuntimeContext::default();
        assert_eq!(rc.retry_no, -1);
        assert_eq!(rc.iteration_no, -1);
        assert_eq!(rc.attempts, 0);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_value(TaskState::Delayed).unwrap(),
            serde_json::json!("DELAYED")
        );
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::Waiting.is_terminal());
    }
}
