//! One workflow execution loaded inside a transaction.
//!
//! [`WorkflowRun`] is synchronous: it mutates the loaded records, keeps
//! the audit trace and collects post-commit commands. The orchestrator
//! loads it, calls one entry point, and persists [`RunChanges`].

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use taskweave_actions::ActionRegistry;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::models::{
    ActionExecution, ActionState, EntityKind, ParentLink, TaskExecution, TaskState,
    TransitionRecord, WithItemsProgress, WorkflowExecution, WorkflowState,
};
use crate::error::{EngineError, EngineResult};
use crate::executor::ActionRequest;
use crate::spec::{JsonMap, NodeId, WorkflowDefinition};

use super::commands::{Command, DispatchPlan};
use super::data_flow::{
    evaluate_output, evaluate_task_input, get_outbound_context, get_task_output, merge_into,
    task_result_entry,
};
use super::evaluator::Evaluator;
use super::policies::{apply_policies, Outcome, PolicyDecision};
use super::resolver::{evaluate_transitions, resolve, Resolution, Snapshot};
use super::state::{
    action_record, derive_workflow_state, terminal_context, transition_task, transition_workflow,
};
use super::with_items::{evaluate_items, item_context};

/// An attempt outcome decided while dispatching, applied in the same
/// transaction.
#[derive(Debug)]
struct Immediate {
    node: NodeId,
    outcome: Outcome,
    result: Value,
    state_info: Option<String>,
}

/// Records to persist and commands to run after commit.
#[derive(Debug)]
pub struct RunChanges {
    pub workflow: WorkflowExecution,
    pub workflow_changed: bool,
    pub tasks: Vec<TaskExecution>,
    pub actions: Vec<ActionExecution>,
    pub trace: Vec<TransitionRecord>,
    pub plan: DispatchPlan,
}

/// In-transaction view of a workflow execution and its tasks.
pub struct WorkflowRun<'a> {
    def: Arc<WorkflowDefinition>,
    evaluator: &'a dyn Evaluator,
    registry: &'a ActionRegistry,
    wf: WorkflowExecution,
    slots: Vec<Option<TaskExecution>>,
    actions: HashMap<Uuid, ActionExecution>,
    wf_changed: bool,
    changed_tasks: BTreeSet<NodeId>,
    changed_actions: Vec<Uuid>,
    trace: Vec<TransitionRecord>,
    plan: DispatchPlan,
    immediate: VecDeque<Immediate>,
    now: DateTime<Utc>,
}

impl<'a> WorkflowRun<'a> {
    pub fn new(
        def: Arc<WorkflowDefinition>,
        evaluator: &'a dyn Evaluator,
        registry: &'a ActionRegistry,
        wf: WorkflowExecution,
        tasks: Vec<TaskExecution>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut slots = vec![None; def.graph.len()];
        for task in tasks {
            match def.graph.node_id(&task.name) {
                Some(id) => slots[id] = Some(task),
                None => warn!(
                    workflow_execution_id = %wf.id,
                    task = %task.name,
                    "Task execution has no node in the workflow graph"
                ),
            }
        }

        Self {
            def,
            evaluator,
            registry,
            wf,
            slots,
            actions: HashMap::new(),
            wf_changed: false,
            changed_tasks: BTreeSet::new(),
            changed_actions: Vec::new(),
            trace: Vec::new(),
            plan: DispatchPlan::new(),
            immediate: VecDeque::new(),
            now,
        }
    }

    pub fn workflow(&self) -> &WorkflowExecution {
        &self.wf
    }

    pub fn task(&self, node: NodeId) -> Option<&TaskExecution> {
        self.slots.get(node).and_then(Option::as_ref)
    }

    pub fn node_of(&self, task_execution_id: Uuid) -> Option<NodeId> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| t.id == task_execution_id))
    }

    /// Make a loaded action execution available to [`Self::complete_action`].
    pub fn add_action(&mut self, action: ActionExecution) {
        self.actions.insert(action.id, action);
    }

    /// Create IDLE task executions for `nodes`.
    pub fn materialize(&mut self, nodes: &[NodeId]) {
        for &id in nodes {
            if self.slots[id].is_some() {
                continue;
            }
            let task = TaskExecution::new(self.wf.id, self.def.graph.node(id).name.clone(), self.now);
            self.trace.push(TransitionRecord {
                workflow_execution_id: self.wf.id,
                entity: EntityKind::Task,
                entity_id: task.id,
                name: task.name.clone(),
                previous_state: None,
                state: task.state.to_string(),
                state_info: None,
                timestamp: self.now,
            });
            self.slots[id] = Some(task);
            self.changed_tasks.insert(id);
        }
    }

    /// Move an IDLE execution to RUNNING and trigger its start tasks.
    pub fn start(&mut self) -> EngineResult<()> {
        self.set_workflow_state(WorkflowState::Running, None)?;
        self.settle()
    }

    /// Record an action's result and apply it to its task.
    ///
    /// Duplicates, completions for finished executions and completions
    /// for tasks that moved on are recorded but change nothing else.
    pub fn complete_action(
        &mut self,
        action_execution_id: Uuid,
        outcome: Outcome,
        result: Value,
    ) -> EngineResult<()> {
        let now = self.now;
        let action = self.actions.get_mut(&action_execution_id).ok_or_else(|| {
            EngineError::NotFound(format!("Action execution {}", action_execution_id))
        })?;
        if action.accepted {
            debug!(%action_execution_id, "Duplicate completion ignored");
            return Ok(());
        }

        let previous = action.state;
        action.state = match outcome {
            Outcome::Success => ActionState::Success,
            Outcome::Error => ActionState::Error,
        };
        action.output = Some(result.clone());
        action.accepted = true;
        action.updated_at = now;
        let record = action_record(action, Some(previous), now);
        let (task_id, attempt, index) = (action.task_execution_id, action.attempt, action.index);
        self.trace.push(record);
        self.mark_action(action_execution_id);

        if self.wf.state.is_terminal() {
            info!(
                workflow_execution_id = %self.wf.id,
                %action_execution_id,
                state = %self.wf.state,
                "Completion recorded for finished workflow execution"
            );
            return Ok(());
        }

        let node = self
            .node_of(task_id)
            .ok_or_else(|| EngineError::NotFound(format!("Task execution {}", task_id)))?;
        let task = self.slot(node)?;
        if task.state != TaskState::Running || task.runtime_context.attempts != attempt {
            debug!(
                task = %task.name,
                state = %task.state,
                %action_execution_id,
                "Completion recorded for task that moved on"
            );
            return Ok(());
        }

        match index {
            Some(index) => self.complete_item(node, index, outcome, result)?,
            None => self.apply_task_outcome(node, outcome, result, None)?,
        }
        self.settle()
    }

    /// Release a DELAYED task. Returns whether the task was delayed.
    pub fn release_delay(&mut self, node: NodeId) -> EngineResult<bool> {
        let wait_before = self.def.task(node).wait_before;
        let task = self.slot_mut(node)?;
        if task.state != TaskState::Delayed {
            return Ok(false);
        }
        if wait_before > 0 {
            task.runtime_context.wait_before_done = true;
        }
        task.runtime_context.delay_until = None;
        self.set_task_state(node, TaskState::Idle, None)?;
        if self.wf.state == WorkflowState::Running {
            self.dispatch(node)?;
        }
        Ok(true)
    }

    /// Operator skip of a non-terminal task.
    pub fn skip(&mut self, node: NodeId) -> EngineResult<()> {
        let task = self.slot(node)?;
        if task.state.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "Task '{}' is already {}",
                task.name, task.state
            )));
        }
        self.set_task_state(node, TaskState::Skipped, Some("Skipped by operator".to_string()))?;
        self.settle()
    }

    /// Pause or cancel the execution.
    pub fn stop(&mut self, target: WorkflowState, info: String) -> EngineResult<()> {
        self.set_workflow_state(target, Some(info))?;
        if target == WorkflowState::Cancelled {
            self.notify_parent();
        }
        Ok(())
    }

    /// Continue a PAUSED execution.
    ///
    /// Dispatches tasks released while paused, releases elapsed timers,
    /// reschedules pending ones and resumes with-items fan-out.
    pub fn resume(&mut self) -> EngineResult<()> {
        self.set_workflow_state(WorkflowState::Running, None)?;

        let order = self.def.graph.topo_order().to_vec();
        for node in order {
            let Some(task) = self.task(node) else {
                continue;
            };
            let (state, triggered, delay_until, task_id) =
                (task.state, task.triggered, task.runtime_context.delay_until, task.id);
            let items_pending = task
                .runtime_context
                .with_items
                .as_ref()
                .is_some_and(|p| !p.failed && p.next_index < p.items.len());

            match state {
                TaskState::Idle if triggered => self.dispatch(node)?,
                TaskState::Delayed => match delay_until {
                    Some(fire_at) if fire_at > self.now => self.plan.push(Command::ScheduleDelay {
                        task_execution_id: task_id,
                        fire_at,
                    }),
                    _ => {
                        self.release_delay(node)?;
                    }
                },
                TaskState::Running if items_pending => {
                    self.dispatch_items(node)?;
                    self.finish_items_if_complete(node)?;
                }
                _ => {}
            }
        }
        self.settle()
    }

    /// Resolve the graph and apply immediate outcomes until nothing
    /// changes, then re-derive the workflow state.
    pub fn settle(&mut self) -> EngineResult<()> {
        loop {
            let mut progressed = false;

            if self.wf.state == WorkflowState::Running {
                let snapshot = Snapshot::from_tasks(&self.def.graph, self.slots.iter().flatten());
                let resolution = resolve(&self.def.spec, &self.def.graph, &snapshot);
                if !resolution.is_empty() {
                    progressed = true;
                    self.apply_resolution(resolution)?;
                }
            }

            if let Some(imm) = self.immediate.pop_front() {
                progressed = true;
                self.apply_task_outcome(imm.node, imm.outcome, imm.result, imm.state_info)?;
            }

            if !progressed {
                break;
            }
        }
        self.refresh_workflow_state()
    }

    pub fn into_changes(self) -> RunChanges {
        let mut slots = self.slots;
        let tasks = self
            .changed_tasks
            .iter()
            .filter_map(|id| slots[*id].take())
            .collect();
        let mut actions = self.actions;
        let actions = self
            .changed_actions
            .iter()
            .filter_map(|id| actions.remove(id))
            .collect();

        RunChanges {
            workflow: self.wf,
            workflow_changed: self.wf_changed,
            tasks,
            actions,
            trace: self.trace,
            plan: self.plan,
        }
    }

    // ------------------------------------------------------------------
    // Graph resolution and dispatch
    // ------------------------------------------------------------------

    fn apply_resolution(&mut self, resolution: Resolution) -> EngineResult<()> {
        for node in resolution.skipped {
            self.set_task_state(
                node,
                TaskState::Skipped,
                Some("No inbound transition can fire".to_string()),
            )?;
        }
        for node in resolution.waiting {
            self.set_task_state(node, TaskState::Waiting, None)?;
        }
        for node in resolution.runnable {
            self.trigger(node)?;
        }
        Ok(())
    }

    fn trigger(&mut self, node: NodeId) -> EngineResult<()> {
        let in_context = self.in_context_for(node);
        let wait_before = self.def.task(node).wait_before;

        let task = self.slot_mut(node)?;
        task.triggered = true;
        task.in_context = in_context;
        let must_wait = wait_before > 0 && !task.runtime_context.wait_before_done;
        debug!(task = %task.name, must_wait, "Triggering task");

        if must_wait {
            self.delay(node, Duration::from_secs(wait_before))
        } else {
            self.dispatch(node)
        }
    }

    /// Context on entry: the execution context merged with the outbound
    /// contexts of required and firing predecessors, in topological order.
    fn in_context_for(&self, node: NodeId) -> JsonMap {
        let graph = &self.def.graph;
        let gnode = graph.node(node);

        let mut preds: Vec<NodeId> = gnode.requires.clone();
        for src in &gnode.inbound_sources {
            let fired = self.task(*src).is_some_and(|t| {
                t.state.is_terminal() && t.next_tasks.iter().any(|n| *n == gnode.name)
            });
            if fired && !preds.contains(src) {
                preds.push(*src);
            }
        }
        preds.sort_by_key(|id| graph.topo_position(*id));

        let mut ctx = self.wf.context.clone();
        for pred in preds {
            if let Some(task) = self.task(pred) {
                merge_into(&mut ctx, &task.in_context);
                merge_into(&mut ctx, &task.output);
            }
        }
        ctx
    }

    fn delay(&mut self, node: NodeId, delay: Duration) -> EngineResult<()> {
        let fire_at = self.now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        self.set_task_state(node, TaskState::Delayed, None)?;
        let task = self.slot_mut(node)?;
        task.runtime_context.delay_until = Some(fire_at);
        let task_execution_id = task.id;
        self.plan.push(Command::ScheduleDelay {
            task_execution_id,
            fire_at,
        });
        Ok(())
    }

    fn dispatch(&mut self, node: NodeId) -> EngineResult<()> {
        self.set_task_state(node, TaskState::Running, None)?;

        let def = self.def.clone();
        let spec = def.task(node);
        let evaluator = self.evaluator;
        let registry = self.registry;
        let wf_id = self.wf.id;

        let task = self.slot_mut(node)?;
        task.runtime_context.attempts += 1;
        if task.runtime_context.iteration_no < 0 {
            task.runtime_context.iteration_no = 0;
        }
        let task_id = task.id;
        let in_context = task.in_context.clone();

        if let Some(workflow_name) = &spec.workflow {
            let input = evaluate_task_input(evaluator, spec, |_| false, &in_context)?;
            let action_id = self.create_action(node, workflow_name, input.clone(), None, true)?;
            let env = in_context
                .get("env")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            self.plan.push(Command::StartSubWorkflow {
                parent: ParentLink {
                    workflow_execution_id: wf_id,
                    task_execution_id: task_id,
                    action_execution_id: action_id,
                },
                workflow_name: workflow_name.clone(),
                input,
                env,
            });
            return Ok(());
        }

        if let Some(with_items) = &spec.with_items {
            match evaluate_items(evaluator, with_items, &in_context) {
                Ok(items) => {
                    self.slot_mut(node)?.runtime_context.with_items = Some(WithItemsProgress::new(items));
                    self.dispatch_items(node)?;
                    if let Some(progress) = self.progress(node) {
                        if progress.is_complete() {
                            let (outcome, result) = (progress.outcome(), progress.aggregate());
                            self.immediate.push_back(Immediate {
                                node,
                                outcome,
                                result,
                                state_info: None,
                            });
                        }
                    }
                }
                Err(e) => self.fail_fast(node, e),
            }
            return Ok(());
        }

        let action_name = spec.action.clone().unwrap_or_default();
        let descriptor = registry.descriptor(&action_name);
        match evaluate_task_input(
            evaluator,
            spec,
            |p| descriptor.is_some_and(|d| d.is_required(p)),
            &in_context,
        ) {
            Ok(input) => self.run_action(node, &action_name, input, None),
            Err(e) => {
                self.fail_fast(node, e);
                Ok(())
            }
        }
    }

    /// Dispatch the next with-items elements allowed by the concurrency limit.
    fn dispatch_items(&mut self, node: NodeId) -> EngineResult<()> {
        let def = self.def.clone();
        let spec = def.task(node);
        let Some(with_items) = &spec.with_items else {
            return Ok(());
        };
        let evaluator = self.evaluator;
        let registry = self.registry;
        let action_name = spec.action.clone().unwrap_or_default();
        let descriptor = registry.descriptor(&action_name);

        let task = self.slot_mut(node)?;
        let in_context = task.in_context.clone();
        let Some(progress) = task.runtime_context.with_items.as_mut() else {
            return Ok(());
        };
        let batch = progress.next_batch(with_items.concurrency);
        self.changed_tasks.insert(node);

        for (index, item) in batch {
            let ctx = item_context(&in_context, &with_items.var, &item, index);
            match evaluate_task_input(
                evaluator,
                spec,
                |p| descriptor.is_some_and(|d| d.is_required(p)),
                &ctx,
            ) {
                Ok(input) => self.run_action(node, &action_name, input, Some(index))?,
                Err(e) => {
                    warn!(task = %spec.name, index, error = %e, "With-items element input failed");
                    if let Some(progress) = self.slot_mut(node)?.runtime_context.with_items.as_mut() {
                        progress.record(index, Outcome::Error, Value::String(e.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    fn complete_item(
        &mut self,
        node: NodeId,
        index: usize,
        outcome: Outcome,
        result: Value,
    ) -> EngineResult<()> {
        let Some(progress) = self.slot_mut(node)?.runtime_context.with_items.as_mut() else {
            return Ok(());
        };
        progress.record(index, outcome, result);
        self.changed_tasks.insert(node);

        if self.wf.state == WorkflowState::Running {
            self.dispatch_items(node)?;
        }
        self.finish_items_if_complete(node)
    }

    fn finish_items_if_complete(&mut self, node: NodeId) -> EngineResult<()> {
        let Some(progress) = self.progress(node) else {
            return Ok(());
        };
        if !progress.is_complete() {
            return Ok(());
        }
        let (outcome, result) = (progress.outcome(), progress.aggregate());
        self.apply_task_outcome(node, outcome, result, None)
    }

    fn progress(&self, node: NodeId) -> Option<&WithItemsProgress> {
        self.task(node)
            .and_then(|t| t.runtime_context.with_items.as_ref())
    }

    fn run_action(
        &mut self,
        node: NodeId,
        action_name: &str,
        input: JsonMap,
        index: Option<usize>,
    ) -> EngineResult<()> {
        let sync = self
            .registry
            .descriptor(action_name)
            .is_some_and(|d| d.sync);
        let action_execution_id = self.create_action(node, action_name, input.clone(), index, false)?;
        let task = self.slot(node)?;
        let request = ActionRequest {
            action_execution_id,
            task_execution_id: task.id,
            workflow_execution_id: self.wf.id,
            task_name: task.name.clone(),
            action_name: action_name.to_string(),
            input,
            timeout: self.def.task(node).timeout,
        };
        self.plan.push(Command::RunAction { request, sync });
        Ok(())
    }

    fn create_action(
        &mut self,
        node: NodeId,
        name: &str,
        input: JsonMap,
        index: Option<usize>,
        is_workflow: bool,
    ) -> EngineResult<Uuid> {
        let task = self.slot(node)?;
        let mut action = ActionExecution::new(
            task.id,
            self.wf.id,
            name,
            input,
            task.runtime_context.attempts,
            self.now,
        );
        action.is_workflow = is_workflow;
        action.is_sync = !is_workflow && self.registry.descriptor(name).is_some_and(|d| d.sync);
        action.index = index;

        self.trace.push(action_record(&action, None, self.now));
        let id = action.id;
        self.actions.insert(id, action);
        self.mark_action(id);
        Ok(id)
    }

    fn fail_fast(&mut self, node: NodeId, error: EngineError) {
        warn!(
            workflow_execution_id = %self.wf.id,
            task = %self.def.graph.node(node).name,
            error = %error,
            "Task failed before dispatch"
        );
        let message = error.to_string();
        self.immediate.push_back(Immediate {
            node,
            outcome: Outcome::Error,
            result: Value::String(message.clone()),
            state_info: Some(message),
        });
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Publish an attempt's result and decide between rerun and a final state.
    fn apply_task_outcome(
        &mut self,
        node: NodeId,
        outcome: Outcome,
        result: Value,
        state_info: Option<String>,
    ) -> EngineResult<()> {
        let def = self.def.clone();
        let spec = def.task(node);
        let evaluator = self.evaluator;
        let running = self.wf.state == WorkflowState::Running;

        let task = self.slot_mut(node)?;
        task.result = Some(result.clone());
        let output = match outcome {
            Outcome::Success => get_task_output(evaluator, spec, &result, &task.in_context),
            Outcome::Error => task_result_entry(&spec.name, &result),
        };
        let outbound = get_outbound_context(&task.in_context, &output);
        let decision = apply_policies(spec, &mut task.runtime_context, outcome, evaluator, &outbound);
        self.changed_tasks.insert(node);

        match decision {
            PolicyDecision::Rerun { delay } => {
                self.slot_mut(node)?.runtime_context.with_items = None;
                if delay.is_zero() {
                    self.set_task_state(node, TaskState::Idle, None)?;
                    if running {
                        self.dispatch(node)?;
                    }
                    Ok(())
                } else {
                    self.delay(node, delay)
                }
            }
            PolicyDecision::Final(state) => {
                let (next_tasks, error_handled) =
                    evaluate_transitions(&def.graph, node, state, &outbound, evaluator);
                let info = (state == TaskState::Error)
                    .then(|| state_info.unwrap_or_else(|| describe(&result)));

                let task = self.slot_mut(node)?;
                task.output = output;
                task.next_tasks = next_tasks;
                task.error_handled = error_handled;
                self.set_task_state(node, state, info)
            }
        }
    }

    fn refresh_workflow_state(&mut self) -> EngineResult<()> {
        if self.wf.state != WorkflowState::Running {
            return Ok(());
        }

        let tasks: Vec<&TaskExecution> = self
            .def
            .graph
            .topo_order()
            .iter()
            .filter_map(|id| self.task(*id))
            .collect();
        let (state, info) = derive_workflow_state(tasks.iter().copied());
        if state == WorkflowState::Running {
            return Ok(());
        }

        if state == WorkflowState::Success {
            let ctx = terminal_context(&self.wf.context, tasks.iter().copied());
            self.wf.output = evaluate_output(self.evaluator, &self.def.spec, &ctx);
        }
        self.set_workflow_state(state, info)?;
        self.notify_parent();
        Ok(())
    }

    fn notify_parent(&mut self) {
        let Some(parent) = self.wf.parent else {
            return;
        };
        let (outcome, result) = match self.wf.state {
            WorkflowState::Success => (Outcome::Success, Value::Object(self.wf.output.clone())),
            state => (
                Outcome::Error,
                Value::String(self.wf.state_info.clone().unwrap_or_else(|| {
                    format!("Workflow execution {} ended in {}", self.wf.id, state)
                })),
            ),
        };
        self.plan.push(Command::NotifyParent {
            action_execution_id: parent.action_execution_id,
            outcome,
            result,
        });
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn set_workflow_state(&mut self, state: WorkflowState, info: Option<String>) -> EngineResult<()> {
        let record = transition_workflow(&mut self.wf, state, info, self.now)?;
        self.trace.push(record);
        self.wf_changed = true;
        self.plan.push(Command::Announce {
            workflow_execution_id: self.wf.id,
            state,
        });
        Ok(())
    }

    fn set_task_state(
        &mut self,
        node: NodeId,
        state: TaskState,
        info: Option<String>,
    ) -> EngineResult<()> {
        let now = self.now;
        let task = self.slot_mut(node)?;
        let record = transition_task(task, state, info, now)?;
        self.trace.push(record);
        self.changed_tasks.insert(node);
        Ok(())
    }

    fn mark_action(&mut self, id: Uuid) {
        if !self.changed_actions.contains(&id) {
            self.changed_actions.push(id);
        }
    }

    fn slot(&self, node: NodeId) -> EngineResult<&TaskExecution> {
        self.task(node).ok_or_else(|| not_materialized(node))
    }

    fn slot_mut(&mut self, node: NodeId) -> EngineResult<&mut TaskExecution> {
        self.slots
            .get_mut(node)
            .and_then(Option::as_mut)
            .ok_or_else(|| not_materialized(node))
    }
}

fn not_materialized(node: NodeId) -> EngineError {
    EngineError::Internal(format!("Task node {} has no execution", node))
}

/// Human readable form of an error result.
fn describe(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
