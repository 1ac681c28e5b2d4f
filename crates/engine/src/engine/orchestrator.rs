//! Workflow orchestration engine.
//!
//! Coordinates workflow execution by:
//! - Running every operation in a per-workflow store transaction
//! - Retrying transactions that fail on transient store errors
//! - Executing the resulting dispatch plan after commit
//!
//! The engine holds explicit references to its collaborators and keeps
//! no global state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskweave_actions::ActionRegistry;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::models::{
    ActionState, ParentLink, TaskExecution, TaskState, TransitionRecord, WorkflowExecution,
    WorkflowState,
};
use crate::db::{Store, Transaction};
use crate::error::{EngineError, EngineResult};
use crate::executor::{run_action, ActionCompletion, Executor};
use crate::result_ext::ResultExt;
use crate::spec::{JsonMap, WorkflowDefinition, WorkflowSpec};

use super::commands::{Command, DispatchPlan};
use super::data_flow::initial_context;
use super::evaluator::{Evaluator, JinjaEvaluator};
use super::execution::WorkflowRun;
use super::policies::Outcome;
use super::scheduler::{ScheduledDelay, SchedulerLoop, TaskScheduler};

/// Optional parameters for starting a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartParams {
    /// Run only this task and the closure of its `requires`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,

    /// Exposed to expressions as `env`.
    #[serde(default)]
    pub env: JsonMap,
}

/// Workflow state change published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub workflow_execution_id: Uuid,
    pub state: WorkflowState,
}

/// One transactional engine operation.
#[derive(Debug)]
enum Op {
    Start {
        def: Arc<WorkflowDefinition>,
        input: JsonMap,
        params: StartParams,
        parent: Option<ParentLink>,
    },
    CompleteAction {
        action_execution_id: Uuid,
        outcome: Outcome,
        result: Value,
    },
    ReleaseDelay {
        task_execution_id: Uuid,
    },
    Stop {
        target: WorkflowState,
        recursive: bool,
        info: String,
    },
    Resume,
    Skip {
        task_execution_id: Uuid,
    },
}

/// What a committed operation produced.
#[derive(Debug, Default)]
struct Applied {
    plan: DispatchPlan,
    workflow: Option<WorkflowExecution>,
    task: Option<TaskExecution>,
}

/// The workflow execution engine.
pub struct Engine {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    evaluator: Arc<dyn Evaluator>,
    registry: Arc<ActionRegistry>,
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    /// Latest compiled definition per name for specs started unregistered.
    compiled: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    scheduler: TaskScheduler,
    scheduler_rx: Mutex<Option<mpsc::UnboundedReceiver<ScheduledDelay>>>,
    events: broadcast::Sender<WorkflowEvent>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with the Jinja evaluator.
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn Executor>,
        registry: Arc<ActionRegistry>,
        config: EngineConfig,
    ) -> Self {
        let (scheduler, scheduler_rx) = TaskScheduler::channel();
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            executor,
            evaluator: Arc::new(JinjaEvaluator::new()),
            registry,
            definitions: RwLock::new(HashMap::new()),
            compiled: RwLock::new(HashMap::new()),
            scheduler,
            scheduler_rx: Mutex::new(Some(scheduler_rx)),
            events,
            config,
        }
    }

    /// Replace the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Receive workflow state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Spawn the scheduler, timer and completion-listener loops.
    ///
    /// Can be called once per engine.
    pub async fn start(
        self: Arc<Self>,
        mut completions: mpsc::UnboundedReceiver<ActionCompletion>,
    ) -> EngineResult<Vec<JoinHandle<()>>> {
        let requests = self
            .scheduler_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::InvalidState("Engine already started".to_string()))?;
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();

        let scheduler = tokio::spawn(SchedulerLoop::new(requests, fired_tx).run());

        let engine = self.clone();
        let timers = tokio::spawn(async move {
            while let Some(task_execution_id) = fired_rx.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.on_delay_elapsed(task_execution_id).await {
                        error!(%task_execution_id, error = %e, "Failed to release delayed task");
                    }
                });
            }
        });

        let engine = self;
        let listener = tokio::spawn(async move {
            while let Some(completion) = completions.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let id = completion.action_execution_id;
                    if let Err(e) = engine
                        .on_action_completed(id, completion.outcome, completion.result)
                        .await
                    {
                        error!(action_execution_id = %id, error = %e, "Failed to apply completion");
                    }
                });
            }
            debug!("Completion channel closed");
        });

        info!("Engine started");
        Ok(vec![scheduler, timers, listener])
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Validate and register a workflow so tasks can run it by name.
    pub async fn register_workflow(&self, spec: WorkflowSpec) -> EngineResult<()> {
        let def = WorkflowDefinition::compile(spec)?;
        self.validate(&def).await?;
        let name = def.spec.name.clone();
        self.definitions.write().await.insert(name.clone(), Arc::new(def));
        info!(workflow = %name, "Workflow registered");
        Ok(())
    }

    /// Engine-level checks on top of graph compilation.
    async fn validate(&self, def: &WorkflowDefinition) -> EngineResult<()> {
        let definitions = self.definitions.read().await;
        for task in &def.spec.tasks {
            if let Some(action) = &task.action {
                let descriptor = self.registry.descriptor(action).ok_or_else(|| {
                    EngineError::Definition(format!(
                        "Task '{}' references unknown action '{}'",
                        task.name, action
                    ))
                })?;
                if let Some(missing) = descriptor
                    .required_params()
                    .find(|p| !task.input.contains_key(*p))
                {
                    return Err(EngineError::Definition(format!(
                        "Task '{}' does not supply required parameter '{}' of action '{}'",
                        task.name, missing, action
                    )));
                }
            }
            if let Some(workflow) = &task.workflow {
                if !definitions.contains_key(workflow) {
                    return Err(EngineError::Definition(format!(
                        "Task '{}' references unregistered workflow '{}'",
                        task.name, workflow
                    )));
                }
            }
        }
        Ok(())
    }

    /// Compiled definition for an execution's spec.
    ///
    /// A spec is compiled once; registered and previously compiled
    /// definitions with an identical spec are reused.
    async fn definition_for(&self, spec: &WorkflowSpec) -> EngineResult<Arc<WorkflowDefinition>> {
        for cache in [&self.definitions, &self.compiled] {
            if let Some(def) = cache.read().await.get(&spec.name) {
                if def.spec == *spec {
                    return Ok(def.clone());
                }
            }
        }
        let def = Arc::new(WorkflowDefinition::compile(spec.clone())?);
        debug!(workflow = %spec.name, "Compiled workflow definition");
        self.compiled
            .write()
            .await
            .insert(spec.name.clone(), def.clone());
        Ok(def)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Validate, create and start a workflow execution.
    ///
    /// Start tasks are dispatched after the creating transaction commits.
    pub async fn start_workflow_execution(
        &self,
        spec: WorkflowSpec,
        input: JsonMap,
        params: StartParams,
    ) -> EngineResult<WorkflowExecution> {
        let def = self.definition_for(&spec).await?;
        self.validate(&def).await?;

        let id = Uuid::new_v4();
        let op = Op::Start {
            def,
            input,
            params,
            parent: None,
        };
        let applied = self.execute(id, &op).await?;
        let wf = applied
            .workflow
            .clone()
            .ok_or_else(|| EngineError::Internal("start produced no execution".to_string()))?;
        self.run_plan(applied.plan).await;
        Ok(wf)
    }

    /// Apply the result of a task's single outstanding action.
    pub async fn on_task_completed(
        &self,
        task_execution_id: Uuid,
        outcome: Outcome,
        result: Value,
    ) -> EngineResult<TaskExecution> {
        let task = self
            .store
            .get_task_execution(task_execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Task execution {}", task_execution_id)))?;

        let mut tx = self.store.begin(task.workflow_execution_id).await?;
        let outstanding: Vec<Uuid> = tx
            .list_action_executions(task_execution_id)
            .await?
            .into_iter()
            .filter(|a| a.state == ActionState::Running && !a.accepted)
            .map(|a| a.id)
            .collect();
        tx.rollback().await?;

        match outstanding.as_slice() {
            [action_execution_id] => {
                self.on_action_completed(*action_execution_id, outcome, result)
                    .await
            }
            [] => Err(EngineError::InvalidState(format!(
                "Task '{}' has no outstanding action",
                task.name
            ))),
            many => Err(EngineError::InvalidState(format!(
                "Task '{}' has {} outstanding actions",
                task.name,
                many.len()
            ))),
        }
    }

    /// Apply one action execution's result.
    ///
    /// Duplicate and late completions are recorded and otherwise ignored.
    pub async fn on_action_completed(
        &self,
        action_execution_id: Uuid,
        outcome: Outcome,
        result: Value,
    ) -> EngineResult<TaskExecution> {
        let (task, plan) = self
            .complete_action(action_execution_id, outcome, result)
            .await?;
        self.run_plan(plan).await;
        Ok(task)
    }

    /// Timer entry point: release a DELAYED task.
    pub async fn on_delay_elapsed(&self, task_execution_id: Uuid) -> EngineResult<()> {
        let task = self
            .store
            .get_task_execution(task_execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Task execution {}", task_execution_id)))?;
        let applied = self
            .execute(
                task.workflow_execution_id,
                &Op::ReleaseDelay { task_execution_id },
            )
            .await?;
        self.run_plan(applied.plan).await;
        Ok(())
    }

    /// Pause or cancel a workflow execution.
    ///
    /// With `recursive`, cancellation also reaches nested executions.
    pub async fn stop_workflow_execution(
        &self,
        id: Uuid,
        target: WorkflowState,
        recursive: bool,
    ) -> EngineResult<WorkflowExecution> {
        let (wf, plan) = self
            .stop(id, target, recursive, "Stopped by operator".to_string())
            .await?;
        self.run_plan(plan).await;
        Ok(wf)
    }

    /// Continue a paused workflow execution.
    pub async fn resume_workflow_execution(&self, id: Uuid) -> EngineResult<WorkflowExecution> {
        let applied = self.execute(id, &Op::Resume).await?;
        let wf = applied
            .workflow
            .clone()
            .ok_or_else(|| EngineError::NotFound(format!("Workflow execution {}", id)))?;
        self.run_plan(applied.plan).await;
        Ok(wf)
    }

    /// Move a non-terminal task to SKIPPED and resolve the graph.
    pub async fn skip_task_execution(&self, task_execution_id: Uuid) -> EngineResult<TaskExecution> {
        let task = self
            .store
            .get_task_execution(task_execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Task execution {}", task_execution_id)))?;
        let applied = self
            .execute(task.workflow_execution_id, &Op::Skip { task_execution_id })
            .await?;
        let task = applied.task.clone().unwrap_or(task);
        self.run_plan(applied.plan).await;
        Ok(task)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_workflow_execution(&self, id: Uuid) -> EngineResult<WorkflowExecution> {
        self.store
            .get_workflow_execution(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Workflow execution {}", id)))
    }

    pub async fn get_workflow_execution_state(&self, id: Uuid) -> EngineResult<WorkflowState> {
        Ok(self.get_workflow_execution(id).await?.state)
    }

    pub async fn get_task_state(&self, task_execution_id: Uuid) -> EngineResult<TaskState> {
        self.store
            .get_task_execution(task_execution_id)
            .await?
            .map(|t| t.state)
            .ok_or_else(|| EngineError::NotFound(format!("Task execution {}", task_execution_id)))
    }

    pub async fn get_task_executions(&self, workflow_execution_id: Uuid) -> EngineResult<Vec<TaskExecution>> {
        self.store.list_task_executions(workflow_execution_id).await
    }

    /// Audit trace of an execution, in recording order.
    pub async fn get_transitions(&self, workflow_execution_id: Uuid) -> EngineResult<Vec<TransitionRecord>> {
        self.store.list_transitions(workflow_execution_id).await
    }

    // ========================================================================
    // Plan execution
    // ========================================================================

    /// Run a committed plan and every plan it leads to.
    ///
    /// Inline actions and nested executions feed their results back as
    /// new operations; their plans join the same worklist.
    async fn run_plan(&self, plan: DispatchPlan) {
        let mut worklist: VecDeque<Command> = plan.into_iter().collect();

        while let Some(command) = worklist.pop_front() {
            let next = match command {
                Command::RunAction { mut request, sync } => {
                    request.timeout = request.timeout.or(self.config.action_timeout_secs);
                    let completion = if sync {
                        Some(run_action(&self.registry, &request, self.config.dry_run).await)
                    } else if self.executor.dispatch(request.clone()).await {
                        None
                    } else {
                        warn!(
                            action_execution_id = %request.action_execution_id,
                            action = %request.action_name,
                            "Executor rejected action"
                        );
                        Some(ActionCompletion {
                            action_execution_id: request.action_execution_id,
                            outcome: Outcome::Error,
                            result: Value::String(format!(
                                "Executor rejected action '{}'",
                                request.action_name
                            )),
                        })
                    };
                    match completion {
                        Some(c) => self
                            .complete_action(c.action_execution_id, c.outcome, c.result)
                            .await
                            .map(|(_, plan)| plan),
                        None => Ok(DispatchPlan::new()),
                    }
                }
                Command::StartSubWorkflow {
                    parent,
                    workflow_name,
                    input,
                    env,
                } => match self.start_child(parent, &workflow_name, input, env).await {
                    Ok(plan) => Ok(plan),
                    Err(e) => {
                        warn!(workflow = %workflow_name, error = %e, "Failed to start sub-workflow");
                        self.complete_action(
                            parent.action_execution_id,
                            Outcome::Error,
                            Value::String(e.to_string()),
                        )
                        .await
                        .map(|(_, plan)| plan)
                    }
                },
                Command::ScheduleDelay {
                    task_execution_id,
                    fire_at,
                } => {
                    self.scheduler.schedule(task_execution_id, fire_at);
                    Ok(DispatchPlan::new())
                }
                Command::NotifyParent {
                    action_execution_id,
                    outcome,
                    result,
                } => self
                    .complete_action(action_execution_id, outcome, result)
                    .await
                    .map(|(_, plan)| plan),
                Command::CancelWorkflow {
                    workflow_execution_id,
                } => self
                    .stop(
                        workflow_execution_id,
                        WorkflowState::Cancelled,
                        true,
                        "Cancelled with parent workflow execution".to_string(),
                    )
                    .await
                    .map(|(_, plan)| plan),
                Command::Announce {
                    workflow_execution_id,
                    state,
                } => {
                    // No subscribers is fine.
                    let _ = self.events.send(WorkflowEvent {
                        workflow_execution_id,
                        state,
                    });
                    Ok(DispatchPlan::new())
                }
            };

            match next {
                Ok(plan) => worklist.extend(plan),
                Err(e) => error!(error = %e, "Follow-up operation failed"),
            }
        }
    }

    async fn complete_action(
        &self,
        action_execution_id: Uuid,
        outcome: Outcome,
        result: Value,
    ) -> EngineResult<(TaskExecution, DispatchPlan)> {
        let action = self
            .store
            .get_action_execution(action_execution_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Action execution {}", action_execution_id))
            })?;
        let op = Op::CompleteAction {
            action_execution_id,
            outcome,
            result,
        };
        let applied = self.execute(action.workflow_execution_id, &op).await?;
        let task = applied.task.ok_or_else(|| {
            EngineError::NotFound(format!("Task execution {}", action.task_execution_id))
        })?;
        Ok((task, applied.plan))
    }

    async fn start_child(
        &self,
        parent: ParentLink,
        workflow_name: &str,
        input: JsonMap,
        env: JsonMap,
    ) -> EngineResult<DispatchPlan> {
        let def = self
            .definitions
            .read()
            .await
            .get(workflow_name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Workflow '{}'", workflow_name)))?;
        let op = Op::Start {
            def,
            input,
            params: StartParams {
                task_name: None,
                env,
            },
            parent: Some(parent),
        };
        let applied = self.execute(Uuid::new_v4(), &op).await?;
        Ok(applied.plan)
    }

    async fn stop(
        &self,
        id: Uuid,
        target: WorkflowState,
        recursive: bool,
        info: String,
    ) -> EngineResult<(WorkflowExecution, DispatchPlan)> {
        if !matches!(target, WorkflowState::Paused | WorkflowState::Cancelled) {
            return Err(EngineError::InvalidInput(format!(
                "Cannot stop a workflow execution into {}",
                target
            )));
        }
        let op = Op::Stop {
            target,
            recursive,
            info,
        };
        let applied = self.execute(id, &op).await?;
        let wf = applied
            .workflow
            .ok_or_else(|| EngineError::NotFound(format!("Workflow execution {}", id)))?;
        Ok((wf, applied.plan))
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run `op` in a transaction on `workflow_execution_id`, retrying
    /// transient store failures with linear backoff.
    async fn execute(&self, workflow_execution_id: Uuid, op: &Op) -> EngineResult<Applied> {
        let attempts = self.config.store_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.store.begin(workflow_execution_id).await {
                Ok(mut tx) => {
                    let outcome = self.apply(tx.as_mut(), workflow_execution_id, op).await;
                    match outcome {
                        Ok(applied) => tx.commit().await.map(|()| applied),
                        Err(e) => {
                            let _ = tx.rollback().await.log_warn("rollback after failed apply");
                            Err(e)
                        }
                    }
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(applied) => return Ok(applied),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        %workflow_execution_id,
                        attempt,
                        error = %e,
                        "Transient store error, retrying"
                    );
                    tokio::time::sleep(self.config.store_retry_backoff(attempt)).await;
                }
                Err(e) => {
                    return Err(e).log(format!("engine operation on {}", workflow_execution_id))
                }
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn Transaction,
        workflow_execution_id: Uuid,
        op: &Op,
    ) -> EngineResult<Applied> {
        let now = Utc::now();

        if let Op::Start {
            def,
            input,
            params,
            parent,
        } = op
        {
            let (bound, context) =
                initial_context(&def.spec, input, &params.env, workflow_execution_id)?;
            let nodes = def.graph.reachable(params.task_name.as_deref())?;

            let mut wf = WorkflowExecution::new(workflow_execution_id, def.spec.clone(), bound, now);
            wf.context = context;
            wf.target_task = params.task_name.clone();
            wf.parent = *parent;

            let mut run = WorkflowRun::new(
                def.clone(),
                self.evaluator.as_ref(),
                self.registry.as_ref(),
                wf,
                Vec::new(),
                now,
            );
            run.materialize(&nodes);
            run.start()?;
            info!(
                %workflow_execution_id,
                workflow = %def.spec.name,
                tasks = nodes.len(),
                "Workflow execution created"
            );
            return self.save(tx, run, None).await;
        }

        let wf = tx
            .get_workflow_execution(workflow_execution_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Workflow execution {}", workflow_execution_id))
            })?;
        let def = self.definition_for(&wf.spec).await?;
        let tasks = tx.list_task_executions(workflow_execution_id).await?;
        let mut run = WorkflowRun::new(
            def,
            self.evaluator.as_ref(),
            self.registry.as_ref(),
            wf,
            tasks,
            now,
        );

        match op {
            Op::Start { .. } => Err(EngineError::InvalidState(format!(
                "Workflow execution {} already exists",
                workflow_execution_id
            ))),
            Op::CompleteAction {
                action_execution_id,
                outcome,
                result,
            } => {
                let action = tx
                    .get_action_execution(*action_execution_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::NotFound(format!("Action execution {}", action_execution_id))
                    })?;
                let task_id = action.task_execution_id;
                run.add_action(action);
                run.complete_action(*action_execution_id, *outcome, result.clone())?;
                self.save(tx, run, Some(task_id)).await
            }
            Op::ReleaseDelay { task_execution_id } => {
                let node = node_of(&run, *task_execution_id)?;
                if !run.release_delay(node)? {
                    debug!(%task_execution_id, "Timer fired for task that is not delayed");
                }
                run.settle()?;
                self.save(tx, run, Some(*task_execution_id)).await
            }
            Op::Stop {
                target,
                recursive,
                info,
            } => {
                run.stop(*target, info.clone())?;
                let mut children = Vec::new();
                if *target == WorkflowState::Cancelled && *recursive {
                    for child in tx.list_child_workflows(workflow_execution_id).await? {
                        if !child.state.is_terminal() {
                            children.push(child.id);
                        }
                    }
                }
                let mut applied = self.save(tx, run, None).await?;
                applied.plan.commands.extend(children.into_iter().map(|id| {
                    Command::CancelWorkflow {
                        workflow_execution_id: id,
                    }
                }));
                Ok(applied)
            }
            Op::Resume => {
                run.resume()?;
                self.save(tx, run, None).await
            }
            Op::Skip { task_execution_id } => {
                if run.workflow().state.is_terminal() {
                    return Err(EngineError::InvalidState(format!(
                        "Workflow execution {} is already {}",
                        workflow_execution_id,
                        run.workflow().state
                    )));
                }
                let node = node_of(&run, *task_execution_id)?;
                run.skip(node)?;
                self.save(tx, run, Some(*task_execution_id)).await
            }
        }
    }

    /// Persist a run's changes and hand back its plan.
    async fn save(
        &self,
        tx: &mut dyn Transaction,
        run: WorkflowRun<'_>,
        task_of_interest: Option<Uuid>,
    ) -> EngineResult<Applied> {
        let changes = run.into_changes();

        if changes.workflow_changed {
            tx.put_workflow_execution(&changes.workflow).await?;
        }
        for task in &changes.tasks {
            tx.put_task_execution(task).await?;
        }
        for action in &changes.actions {
            tx.put_action_execution(action).await?;
        }
        for record in &changes.trace {
            tx.append_transition(record).await?;
        }

        let task = match task_of_interest {
            Some(id) => match changes.tasks.iter().find(|t| t.id == id) {
                Some(task) => Some(task.clone()),
                None => tx.get_task_execution(id).await?,
            },
            None => None,
        };

        debug!(
            workflow_execution_id = %changes.workflow.id,
            tasks = changes.tasks.len(),
            actions = changes.actions.len(),
            commands = changes.plan.len(),
            "Transaction changes persisted"
        );
        Ok(Applied {
            plan: changes.plan,
            workflow: Some(changes.workflow),
            task,
        })
    }
}

fn node_of(run: &WorkflowRun<'_>, task_execution_id: Uuid) -> EngineResult<usize> {
    run.node_of(task_execution_id)
        .ok_or_else(|| EngineError::NotFound(format!("Task execution {}", task_execution_id)))
}

#[cfg(test)]
mod tests;
