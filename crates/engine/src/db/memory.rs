//! In-memory Store.
//!
//! Each workflow execution has its own async mutex; a transaction holds
//! the owned guard until commit or rollback and buffers its writes.
//! The lock table keeps weak handles only, so a mutex lives as long as
//! some transaction holds or awaits it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::EngineResult;

use super::models::{ActionExecution, TaskExecution, TransitionRecord, WorkflowExecution};
use super::{Store, Transaction};

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowExecution>,
    tasks: HashMap<Uuid, TaskExecution>,
    actions: HashMap<Uuid, ActionExecution>,
    transitions: HashMap<Uuid, Vec<TransitionRecord>>,
}

/// Store keeping every record in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Mutex<HashMap<Uuid, Weak<Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, workflow_execution_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(&workflow_execution_id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(workflow_execution_id, Arc::downgrade(&lock));
        lock
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, workflow_execution_id: Uuid) -> EngineResult<Box<dyn Transaction>> {
        let guard = self.lock_for(workflow_execution_id).await.lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.clone(),
            _guard: guard,
            pending: Tables::default(),
        }))
    }

    async fn get_workflow_execution(&self, id: Uuid) -> EngineResult<Option<WorkflowExecution>> {
        Ok(self.tables.read().await.workflows.get(&id).cloned())
    }

    async fn get_task_execution(&self, id: Uuid) -> EngineResult<Option<TaskExecution>> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn get_action_execution(&self, id: Uuid) -> EngineResult<Option<ActionExecution>> {
        Ok(self.tables.read().await.actions.get(&id).cloned())
    }

    async fn list_task_executions(
        &self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TaskExecution>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<TaskExecution> = tables
            .tasks
            .values()
            .filter(|t| t.workflow_execution_id == workflow_execution_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        Ok(tasks)
    }

    async fn list_transitions(
        &self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TransitionRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .transitions
            .get(&workflow_execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    _guard: OwnedMutexGuard<()>,
    pending: Tables,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get_workflow_execution(
        &mut self,
        id: Uuid,
    ) -> EngineResult<Option<WorkflowExecution>> {
        if let Some(wf) = self.pending.workflows.get(&id) {
            return Ok(Some(wf.clone()));
        }
        Ok(self.tables.read().await.workflows.get(&id).cloned())
    }

    async fn put_workflow_execution(&mut self, wf: &WorkflowExecution) -> EngineResult<()> {
        self.pending.workflows.insert(wf.id, wf.clone());
        Ok(())
    }

    async fn get_task_execution(&mut self, id: Uuid) -> EngineResult<Option<TaskExecution>> {
        if let Some(task) = self.pending.tasks.get(&id) {
            return Ok(Some(task.clone()));
        }
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn put_task_execution(&mut self, task: &TaskExecution) -> EngineResult<()> {
        self.pending.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn list_task_executions(
        &mut self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TaskExecution>> {
        let tables = self.tables.read().await;
        let mut merged: HashMap<Uuid, TaskExecution> = tables
            .tasks
            .values()
            .filter(|t| t.workflow_execution_id == workflow_execution_id)
            .map(|t| (t.id, t.clone()))
            .collect();
        for task in self.pending.tasks.values() {
            if task.workflow_execution_id == workflow_execution_id {
                merged.insert(task.id, task.clone());
            }
        }
        let mut tasks: Vec<TaskExecution> = merged.into_values().collect();
        tasks.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        Ok(tasks)
    }

    async fn get_action_execution(&mut self, id: Uuid) -> EngineResult<Option<ActionExecution>> {
        if let Some(action) = self.pending.actions.get(&id) {
            return Ok(Some(action.clone()));
        }
        Ok(self.tables.read().await.actions.get(&id).cloned())
    }

    async fn put_action_execution(&mut self, action: &ActionExecution) -> EngineResult<()> {
        self.pending.actions.insert(action.id, action.clone());
        Ok(())
    }

    async fn list_action_executions(
        &mut self,
        task_execution_id: Uuid,
    ) -> EngineResult<Vec<ActionExecution>> {
        let tables = self.tables.read().await;
        let mut merged: HashMap<Uuid, ActionExecution> = tables
            .actions
            .values()
            .filter(|a| a.task_execution_id == task_execution_id)
            .map(|a| (a.id, a.clone()))
            .collect();
        for action in self.pending.actions.values() {
            if action.task_execution_id == task_execution_id {
                merged.insert(action.id, action.clone());
            }
        }
        let mut actions: Vec<ActionExecution> = merged.into_values().collect();
        actions.sort_by_key(|a| (a.attempt, a.index, a.created_at));
        Ok(actions)
    }

    async fn list_child_workflows(
        &mut self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<WorkflowExecution>> {
        let tables = self.tables.read().await;
        Ok(tables
            .workflows
            .values()
            .filter(|wf| {
                wf.parent
                    .is_some_and(|p| p.workflow_execution_id == workflow_execution_id)
            })
            .cloned()
            .collect())
    }

    async fn append_transition(&mut self, record: &TransitionRecord) -> EngineResult<()> {
        self.pending
            .transitions
            .entry(record.workflow_execution_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let MemoryTransaction {
            tables,
            _guard,
            pending,
        } = *self;
        let mut tables = tables.write().await;
        tables.workflows.extend(pending.workflows);
        tables.tasks.extend(pending.tasks);
        tables.actions.extend(pending.actions);
        for (id, records) in pending.transitions {
            tables.transitions.entry(id).or_default().extend(records);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        Ok(())
    }
}
