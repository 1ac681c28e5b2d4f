//! PostgreSQL Store.
//!
//! Records are stored as JSONB next to the columns used for lookups.
//! Transactions on one workflow execution are serialized with a
//! transaction-scoped advisory lock on the execution id.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::EngineResult;
use crate::result_ext::ResultExt;

use super::models::{ActionExecution, TaskExecution, TransitionRecord, WorkflowExecution};
use super::{Store, Transaction};

pub type DbPool = PgPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS taskweave_workflow_execution (
    id UUID PRIMARY KEY,
    parent_id UUID,
    state TEXT NOT NULL,
    body JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS taskweave_workflow_execution_parent_idx
    ON taskweave_workflow_execution (parent_id);

CREATE TABLE IF NOT EXISTS taskweave_task_execution (
    id UUID PRIMARY KEY,
    workflow_execution_id UUID NOT NULL,
    name TEXT NOT NULL,
    state TEXT NOT NULL,
    body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS taskweave_task_execution_workflow_idx
    ON taskweave_task_execution (workflow_execution_id);

CREATE TABLE IF NOT EXISTS taskweave_action_execution (
    id UUID PRIMARY KEY,
    task_execution_id UUID NOT NULL,
    workflow_execution_id UUID NOT NULL,
    state TEXT NOT NULL,
    body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS taskweave_action_execution_task_idx
    ON taskweave_action_execution (task_execution_id);

CREATE TABLE IF NOT EXISTS taskweave_transition (
    seq BIGSERIAL PRIMARY KEY,
    workflow_execution_id UUID NOT NULL,
    body JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS taskweave_transition_workflow_idx
    ON taskweave_transition (workflow_execution_id);
"#;

/// Store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
    lock_timeout: Option<String>,
}

impl PgStore {
    /// Wrap an existing pool; transactions wait for locks indefinitely.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Open a pool from `config` and check that the server answers.
    pub async fn connect(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(config.connect_options()?)
            .await
            .log(format!("connecting to {}", config.target()))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .log("database ping")?;

        tracing::info!(
            target_db = %config.target(),
            max_connections = config.max_connections,
            lock_timeout_ms = ?config.lock_timeout_ms,
            "Connected to PostgreSQL"
        );

        Ok(Self {
            pool,
            lock_timeout: config.lock_timeout_statement(),
        })
    }

    /// Create the tables if they do not exist.
    pub async fn init_schema(&self) -> EngineResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .log("creating taskweave schema")?;
        tracing::info!("Database schema ready");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self, workflow_execution_id: Uuid) -> EngineResult<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await?;
        if let Some(statement) = &self.lock_timeout {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(workflow_execution_id.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_workflow_execution(&self, id: Uuid) -> EngineResult<Option<WorkflowExecution>> {
        let row: Option<(Json<WorkflowExecution>,)> =
            sqlx::query_as("SELECT body FROM taskweave_workflow_execution WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(wf),)| wf))
    }

    async fn get_task_execution(&self, id: Uuid) -> EngineResult<Option<TaskExecution>> {
        let row: Option<(Json<TaskExecution>,)> =
            sqlx::query_as("SELECT body FROM taskweave_task_execution WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(task),)| task))
    }

    async fn get_action_execution(&self, id: Uuid) -> EngineResult<Option<ActionExecution>> {
        let row: Option<(Json<ActionExecution>,)> =
            sqlx::query_as("SELECT body FROM taskweave_action_execution WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(action),)| action))
    }

    async fn list_task_executions(
        &self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TaskExecution>> {
        let rows: Vec<(Json<TaskExecution>,)> = sqlx::query_as(
            r#"
            SELECT body FROM taskweave_task_execution
            WHERE workflow_execution_id = $1
            ORDER BY created_at ASC, name ASC
            "#,
        )
        .bind(workflow_execution_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(Json(task),)| task).collect())
    }

    async fn list_transitions(
        &self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TransitionRecord>> {
        let rows: Vec<(Json<TransitionRecord>,)> = sqlx::query_as(
            r#"
            SELECT body FROM taskweave_transition
            WHERE workflow_execution_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(workflow_execution_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(Json(record),)| record).collect())
    }
}

struct PgTransaction {
    tx: SqlxTransaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get_workflow_execution(
        &mut self,
        id: Uuid,
    ) -> EngineResult<Option<WorkflowExecution>> {
        let row: Option<(Json<WorkflowExecution>,)> =
            sqlx::query_as("SELECT body FROM taskweave_workflow_execution WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(|(Json(wf),)| wf))
    }

    async fn put_workflow_execution(&mut self, wf: &WorkflowExecution) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO taskweave_workflow_execution (id, parent_id, state, body, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET state = EXCLUDED.state, body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(wf.id)
        .bind(wf.parent.map(|p| p.workflow_execution_id))
        .bind(wf.state.to_string())
        .bind(Json(wf))
        .bind(wf.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_task_execution(&mut self, id: Uuid) -> EngineResult<Option<TaskExecution>> {
        let row: Option<(Json<TaskExecution>,)> =
            sqlx::query_as("SELECT body FROM taskweave_task_execution WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(|(Json(task),)| task))
    }

    async fn put_task_execution(&mut self, task: &TaskExecution) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO taskweave_task_execution
                (id, workflow_execution_id, name, state, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET state = EXCLUDED.state, body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(task.id)
        .bind(task.workflow_execution_id)
        .bind(&task.name)
        .bind(task.state.to_string())
        .bind(Json(task))
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_task_executions(
        &mut self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<TaskExecution>> {
        let rows: Vec<(Json<TaskExecution>,)> = sqlx::query_as(
            r#"
            SELECT body FROM taskweave_task_execution
            WHERE workflow_execution_id = $1
            ORDER BY created_at ASC, name ASC
            "#,
        )
        .bind(workflow_execution_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(|(Json(task),)| task).collect())
    }

    async fn get_action_execution(&mut self, id: Uuid) -> EngineResult<Option<ActionExecution>> {
        let row: Option<(Json<ActionExecution>,)> =
            sqlx::query_as("SELECT body FROM taskweave_action_execution WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(|(Json(action),)| action))
    }

    async fn put_action_execution(&mut self, action: &ActionExecution) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO taskweave_action_execution
                (id, task_execution_id, workflow_execution_id, state, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET state = EXCLUDED.state, body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(action.id)
        .bind(action.task_execution_id)
        .bind(action.workflow_execution_id)
        .bind(action.state.to_string())
        .bind(Json(action))
        .bind(action.created_at)
        .bind(action.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_action_executions(
        &mut self,
        task_execution_id: Uuid,
    ) -> EngineResult<Vec<ActionExecution>> {
        let rows: Vec<(Json<ActionExecution>,)> = sqlx::query_as(
            r#"
            SELECT body FROM taskweave_action_execution
            WHERE task_execution_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(task_execution_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(|(Json(action),)| action).collect())
    }

    async fn list_child_workflows(
        &mut self,
        workflow_execution_id: Uuid,
    ) -> EngineResult<Vec<WorkflowExecution>> {
        let rows: Vec<(Json<WorkflowExecution>,)> =
            sqlx::query_as("SELECT body FROM taskweave_workflow_execution WHERE parent_id = $1")
                .bind(workflow_execution_id)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(rows.into_iter().map(|(Json(wf),)| wf).collect())
    }

    async fn append_transition(&mut self, record: &TransitionRecord) -> EngineResult<()> {
        sqlx::query("INSERT INTO taskweave_transition (workflow_execution_id, body) VALUES ($1, $2)")
            .bind(record.workflow_execution_id)
            .bind(Json(record))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
