//! Execution state machine.
//!
//! Allowed task and workflow transitions, the helpers that apply them
//! with an audit record, and the workflow state derivation rule.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::models::{
    ActionExecution, ActionState, EntityKind, TaskExecution, TaskState, TransitionRecord,
    WorkflowExecution, WorkflowState,
};
use crate::error::{EngineError, EngineResult};
use crate::spec::JsonMap;

use super::data_flow::merge_into;

impl TaskState {
    /// Whether the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match self {
            Idle => matches!(next, Running | Delayed | Waiting | Skipped),
            Waiting => matches!(next, Running | Delayed | Skipped),
            Delayed => matches!(next, Idle | Skipped),
            Running => matches!(next, Success | Error | Delayed | Idle | Skipped),
            Success | Error | Skipped => false,
        }
    }
}

impl WorkflowState {
    /// Whether the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        match self {
            Idle => matches!(next, Running),
            Running => matches!(next, Success | Error | Paused | Cancelled),
            Paused => matches!(next, Running | Cancelled),
            Success | Error | Cancelled => false,
        }
    }
}

/// Move a task to `next`, returning the audit record.
pub fn transition_task(
    task: &mut TaskExecution,
    next: TaskState,
    state_info: Option<String>,
    now: DateTime<Utc>,
) -> EngineResult<TransitionRecord> {
    if !task.state.can_transition_to(next) {
        return Err(EngineError::InvalidState(format!(
            "Task '{}' cannot move from {} to {}",
            task.name, task.state, next
        )));
    }
    let previous = task.state;
    task.state = next;
    task.state_info = state_info;
    task.updated_at = now;

    info!(
        workflow_execution_id = %task.workflow_execution_id,
        task = %task.name,
        from = %previous,
        state = %next,
        "Task state changed"
    );
    Ok(TransitionRecord {
        workflow_execution_id: task.workflow_execution_id,
        entity: EntityKind::Task,
        entity_id: task.id,
        name: task.name.clone(),
        previous_state: Some(previous.to_string()),
        state: next.to_string(),
        state_info: task.state_info.clone(),
        timestamp: now,
    })
}

/// Move a workflow to `next`, returning the audit record.
pub fn transition_workflow(
    wf: &mut WorkflowExecution,
    next: WorkflowState,
    state_info: Option<String>,
    now: DateTime<Utc>,
) -> EngineResult<TransitionRecord> {
    if !wf.state.can_transition_to(next) {
        return Err(EngineError::InvalidState(format!(
            "Workflow execution {} cannot move from {} to {}",
            wf.id, wf.state, next
        )));
    }
    let previous = wf.state;
    wf.state = next;
    wf.state_info = state_info;
    wf.updated_at = now;

    info!(
        workflow_execution_id = %wf.id,
        workflow = %wf.name,
        from = %previous,
        state = %next,
        "Workflow state changed"
    );
    Ok(TransitionRecord {
        workflow_execution_id: wf.id,
        entity: EntityKind::Workflow,
        entity_id: wf.id,
        name: wf.name.clone(),
        previous_state: Some(previous.to_string()),
        state: next.to_string(),
        state_info: wf.state_info.clone(),
        timestamp: now,
    })
}

/// Audit record for a newly created or completed action execution.
pub fn action_record(
    action: &ActionExecution,
    previous: Option<ActionState>,
    now: DateTime<Utc>,
) -> TransitionRecord {
    TransitionRecord {
        workflow_execution_id: action.workflow_execution_id,
        entity: EntityKind::Action,
        entity_id: action.id,
        name: action.action_name.clone(),
        previous_state: previous.map(|s| s.to_string()),
        state: action.state.to_string(),
        state_info: None,
        timestamp: now,
    }
}

/// Workflow state implied by its tasks.
///
/// RUNNING while any task is not terminal. Once all are, ERROR naming
/// the first task, in the order given, that ended in ERROR without a
/// firing `on_error` edge, else SUCCESS.
pub fn derive_workflow_state<'a, I>(tasks: I) -> (WorkflowState, Option<String>)
where
    I: IntoIterator<Item = &'a TaskExecution>,
{
    let mut all_terminal = true;
    let mut first_error: Option<&TaskExecution> = None;
    for task in tasks {
        if task.state == TaskState::Error && !task.error_handled && first_error.is_none() {
            first_error = Some(task);
        }
        all_terminal &= task.state.is_terminal();
    }
    match first_error {
        _ if !all_terminal => (WorkflowState::Running, None),
        Some(task) => {
            let info = format!(
                "Failure caused by error in task '{}': {}",
                task.name,
                task.state_info.as_deref().unwrap_or("unknown error")
            );
            (WorkflowState::Error, Some(info))
        }
        None => (WorkflowState::Success, None),
    }
}

/// Merge of the outbound contexts of successful tasks, in the order given.
pub fn terminal_context<'a, I>(base: &JsonMap, tasks: I) -> JsonMap
where
    I: IntoIterator<Item = &'a TaskExecution>,
{
    let mut ctx = base.clone();
    for task in tasks.into_iter().filter(|t| t.state == TaskState::Success) {
        merge_into(&mut ctx, &task.in_context);
        merge_into(&mut ctx, &task.output);
    }
    ctx
}
