//! Persistence collaborator.
//!
//! The engine reads and writes execution records only through [`Store`]
//! and [`Transaction`]. A transaction is scoped to one workflow execution
//! and serializes against every other transaction on the same execution;
//! transactions on different executions proceed in parallel.

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{DbPool, PgStore};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineResult;
use models::{ActionExecution, TaskExecution, TransitionRecord, WorkflowExecution};

/// Transactional record store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction holding the lock for `workflow_execution_id`.
    ///
    /// Waits while another transaction holds the same lock.
    async fn begin(&self, workflow_execution_id: Uuid) -> EngineResult<Box<dyn Transaction>>;

    // Non-locking reads of committed state.

    async fn get_workflow_execution(&self, id: Uuid) -> EngineResult<Option<WorkflowExecution>>;

    async fn get_task_execution(&self, id: Uuid) -> EngineResult<Option<TaskExecution>>;

    async fn get_action_execution(&self, id: Uuid) -> EngineResult<Option<ActionExecution>>;

    async fn list_task_executions(
        &self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TaskExecution>>;

    async fn list_transitions(
        &self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TransitionRecord>>;
}

/// A unit of work over one workflow execution.
///
/// Writes become visible on `commit`; dropping or rolling back discards
/// them.
#[async_trait]
pub trait Transaction: Send {
    async fn get_workflow_execution(&mut self, id: Uuid)
        -> EngineResult<Option<WorkflowExecution>>;

    async fn put_workflow_execution(&mut self, wf: &WorkflowExecution) -> EngineResult<()>;

    async fn get_task_execution(&mut self, id: Uuid) -> EngineResult<Option<TaskExecution>>;

    async fn put_task_execution(&mut self, task: &TaskExecution) -> EngineResult<()>;

    async fn list_task_executions(
        &mut self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TaskExecution>>;

    async fn get_action_execution(&mut self, id: Uuid) -> EngineResult<Option<ActionExecution>>;

    async fn put_action_execution(&mut self, action: &ActionExecution) -> EngineResult<()>;

    async fn list_action_executions(
        &mut self,
        task_execution_id: Uuid,
    ) -> EngineResult<Vec<ActionExecution>>;

    /// Nested executions started by tasks of `workflow_execution_id`.
    async fn list_child_workflows(
        &mut self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<WorkflowExecution>>;

    async fn append_transition(&mut self, record: &TransitionRecord) -> EngineResult<()>;

    async fn commit(self: Box<Self>) -> EngineResult<()>;

    async fn rollback(self: Box<Self>) -> EngineResult<()>;
}
