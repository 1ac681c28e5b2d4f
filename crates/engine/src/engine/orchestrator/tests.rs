use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde_json::json;
use taskweave_actions::create_default_registry;

use super::*;
use crate::db::models::{ActionExecution, EntityKind};
use crate::db::MemoryStore;
use crate::executor::ActionRequest;
use crate::spec::parse_workflow;

/// Accepts every action and remembers it; tests complete them by hand.
#[derive(Default)]
struct RecordingExecutor {
    requests: StdMutex<Vec<ActionRequest>>,
}

impl RecordingExecutor {
    fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn dispatch(&self, request: ActionRequest) -> bool {
        self.requests.lock().unwrap().push(request);
        true
    }
}

/// Refuses the first `rejections` dispatches, then records like
/// [`RecordingExecutor`].
struct RejectingExecutor {
    rejections: AtomicUsize,
    accepted: RecordingExecutor,
}

#[async_trait]
impl Executor for RejectingExecutor {
    async fn dispatch(&self, request: ActionRequest) -> bool {
        let reject = self
            .rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        !reject && self.accepted.dispatch(request).await
    }
}

/// A MemoryStore whose transactions fail on demand.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    /// Commits still to fail with a transient conflict.
    commit_failures: AtomicUsize,
    /// Fail every task write with a permanent error.
    fail_task_writes: AtomicBool,
    begun: StdMutex<Vec<Uuid>>,
}

#[async_trait]
impl Store for FaultyStore {
    async fn begin(&self, workflow_execution_id: Uuid) -> EngineResult<Box<dyn Transaction>> {
        self.begun.lock().unwrap().push(workflow_execution_id);
        let inner = self.inner.begin(workflow_execution_id).await?;
        let fail_commit = self
            .commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(Box::new(FaultyTransaction {
            inner,
            fail_commit,
            fail_task_writes: self.fail_task_writes.load(Ordering::SeqCst),
        }))
    }

    async fn get_workflow_execution(&self, id: Uuid) -> EngineResult<Option<WorkflowExecution>> {
        self.inner.get_workflow_execution(id).await
    }

    async fn get_task_execution(&self, id: Uuid) -> EngineResult<Option<TaskExecution>> {
        self.inner.get_task_execution(id).await
    }

    async fn get_action_execution(&self, id: Uuid) -> EngineResult<Option<ActionExecution>> {
        self.inner.get_action_execution(id).await
    }

    async fn list_task_executions(&self, id: Uuid) -> EngineResult<Vec<TaskExecution>> {
        self.inner.list_task_executions(id).await
    }

    async fn list_transitions(&self, id: Uuid) -> EngineResult<Vec<TransitionRecord>> {
        self.inner.list_transitions(id).await
    }
}

struct FaultyTransaction {
    inner: Box<dyn Transaction>,
    fail_commit: bool,
    fail_task_writes: bool,
}

#[async_trait]
impl Transaction for FaultyTransaction {
    async fn get_workflow_execution(&mut self, id: Uuid) -> EngineResult<Option<WorkflowExecution>> {
        self.inner.get_workflow_execution(id).await
    }

    async fn put_workflow_execution(&mut self, wf: &WorkflowExecution) -> EngineResult<()> {
        self.inner.put_workflow_execution(wf).await
    }

    async fn get_task_execution(&mut self, id: Uuid) -> EngineResult<Option<TaskExecution>> {
        self.inner.get_task_execution(id).await
    }

    async fn put_task_execution(&mut self, task: &TaskExecution) -> EngineResult<()> {
        if self.fail_task_writes {
            return Err(EngineError::Store("disk full".to_string()));
        }
        self.inner.put_task_execution(task).await
    }

    async fn list_task_executions(&mut self, id: Uuid) -> EngineResult<Vec<TaskExecution>> {
        self.inner.list_task_executions(id).await
    }

    async fn get_action_execution(&mut self, id: Uuid) -> EngineResult<Option<ActionExecution>> {
        self.inner.get_action_execution(id).await
    }

    async fn put_action_execution(&mut self, action: &ActionExecution) -> EngineResult<()> {
        self.inner.put_action_execution(action).await
    }

    async fn list_action_executions(&mut self, id: Uuid) -> EngineResult<Vec<ActionExecution>> {
        self.inner.list_action_executions(id).await
    }

    async fn list_child_workflows(&mut self, id: Uuid) -> EngineResult<Vec<WorkflowExecution>> {
        self.inner.list_child_workflows(id).await
    }

    async fn append_transition(&mut self, record: &TransitionRecord) -> EngineResult<()> {
        self.inner.append_transition(record).await
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let this = *self;
        if this.fail_commit {
            this.inner.rollback().await?;
            return Err(EngineError::Conflict("concurrent update".to_string()));
        }
        this.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        self.inner.rollback().await
    }
}

struct Harness {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    executor: Arc<RecordingExecutor>,
}

fn engine_with(store: Arc<dyn Store>, executor: Arc<dyn Executor>) -> Arc<Engine> {
    let config = EngineConfig {
        store_retry_backoff_ms: 1,
        ..EngineConfig::default()
    };
    Arc::new(Engine::new(
        store,
        executor,
        Arc::new(create_default_registry()),
        config,
    ))
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(RecordingExecutor::default());
    Harness {
        engine: engine_with(store.clone(), executor.clone()),
        store,
        executor,
    }
}

impl Harness {
    async fn start(&self, yaml: &str, input: serde_json::Value) -> WorkflowExecution {
        let spec = parse_workflow(yaml).unwrap();
        let input = input.as_object().cloned().unwrap_or_default();
        self.engine
            .start_workflow_execution(spec, input, StartParams::default())
            .await
            .unwrap()
    }

    async fn task(&self, wf_id: Uuid, name: &str) -> TaskExecution {
        self.engine
            .get_task_executions(wf_id)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.name == name)
            .unwrap_or_else(|| panic!("no task execution named {}", name))
    }

    async fn workflow(&self, wf_id: Uuid) -> WorkflowExecution {
        self.engine.get_workflow_execution(wf_id).await.unwrap()
    }

    async fn times_running(&self, wf_id: Uuid, name: &str) -> usize {
        self.engine
            .get_transitions(wf_id)
            .await
            .unwrap()
            .iter()
            .filter(|r| r.entity == EntityKind::Task && r.name == name && r.state == "RUNNING")
            .count()
    }
}

#[tokio::test]
async fn test_retry_stops_after_count() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: retrying
tasks:
  - name: flaky
    action: std.fail
    retry:
      count: 3
      delay: 1
"#,
            json!({}),
        )
        .await;

    let task = h.task(wf.id, "flaky").await;
    assert_eq!(task.state, TaskState::Delayed);
    assert!(task.runtime_context.delay_until.is_some());

    for _ in 0..3 {
        h.engine.on_delay_elapsed(task.id).await.unwrap();
    }

    let task = h.task(wf.id, "flaky").await;
    assert_eq!(task.state, TaskState::Error);
    assert_eq!(task.runtime_context.retry_no, 2);
    assert_eq!(task.runtime_context.attempts, 4);
    assert_eq!(h.times_running(wf.id, "flaky").await, 4);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Error);
}

#[tokio::test]
async fn test_repeat_breaks_on_condition() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: looping
tasks:
  - name: t
    action: std.async_noop
    repeat:
      iterations: 5
      break_on: "{{ task.t == 2 }}"
"#,
            json!({}),
        )
        .await;

    let task = h.task(wf.id, "t").await;
    h.engine
        .on_task_completed(task.id, Outcome::Success, json!(1))
        .await
        .unwrap();
    assert_eq!(h.task(wf.id, "t").await.state, TaskState::Running);

    let task = h
        .engine
        .on_task_completed(task.id, Outcome::Success, json!(2))
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.runtime_context.iteration_no, 1);
    assert_eq!(h.executor.requests().len(), 2);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_requires_chain_failure_fails_workflow() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: chain
tasks:
  - name: a
    action: std.noop
  - name: b
    action: std.noop
    requires: [a]
  - name: c
    action: std.fail
    requires: [b]
"#,
            json!({}),
        )
        .await;

    let wf = h.workflow(wf.id).await;
    assert_eq!(wf.state, WorkflowState::Error);
    assert!(wf
        .state_info
        .unwrap()
        .starts_with("Failure caused by error in task 'c'"));
    assert_eq!(h.task(wf.id, "b").await.state, TaskState::Success);
}

#[tokio::test]
async fn test_handled_error_lets_workflow_succeed() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: chain_handled
tasks:
  - name: a
    action: std.noop
  - name: b
    action: std.noop
    requires: [a]
  - name: c
    action: std.fail
    requires: [b]
    on_error:
      - d
  - name: d
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let c = h.task(wf.id, "c").await;
    assert_eq!(c.state, TaskState::Error);
    assert!(c.error_handled);
    assert_eq!(h.task(wf.id, "d").await.state, TaskState::Success);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_with_items_results_keep_input_order() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: fan_out
tasks:
  - name: each
    action: std.async_noop
    with_items:
      items: [1, 2, 3, 4, 5]
"#,
            json!({}),
        )
        .await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 5);

    for request in requests.iter().rev() {
        let action = h
            .store
            .get_action_execution(request.action_execution_id)
            .await
            .unwrap()
            .unwrap();
        let index = action.index.unwrap() as u64;
        h.engine
            .on_action_completed(request.action_execution_id, Outcome::Success, json!((index + 1) * 10))
            .await
            .unwrap();
    }

    let task = h.task(wf.id, "each").await;
    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.result, Some(json!([10, 20, 30, 40, 50])));
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_join_all_end_to_end() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: fan_in
output:
  result: "{{ task.task3 }}"
tasks:
  - name: task1
    action: std.echo
    input:
      output: 1
    on_success:
      - task3
  - name: task2
    action: std.echo
    input:
      output: 2
    on_success:
      - task3
  - name: task3
    join: all
    action: std.echo
    input:
      output: "{{ task.task1 }},{{ task.task2 }}"
"#,
            json!({}),
        )
        .await;

    let wf = h.workflow(wf.id).await;
    assert_eq!(wf.state, WorkflowState::Success);
    assert_eq!(serde_json::Value::Object(wf.output), json!({"result": "1,2"}));
    assert_eq!(h.times_running(wf.id, "task3").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_trigger_join_once() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: race
tasks:
  - name: task1
    action: std.async_noop
    on_success: [task3]
  - name: task2
    action: std.async_noop
    on_success: [task3]
  - name: task3
    join: all
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 2);

    let first = {
        let engine = h.engine.clone();
        let id = requests[0].action_execution_id;
        tokio::spawn(async move { engine.on_action_completed(id, Outcome::Success, json!(1)).await })
    };
    let second = {
        let engine = h.engine.clone();
        let id = requests[1].action_execution_id;
        tokio::spawn(async move { engine.on_action_completed(id, Outcome::Success, json!(2)).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(h.times_running(wf.id, "task3").await, 1);
    assert_eq!(h.task(wf.id, "task3").await.state, TaskState::Success);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_duplicate_completion_is_ignored() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: once
tasks:
  - name: a
    action: std.async_noop
"#,
            json!({}),
        )
        .await;

    let id = h.executor.requests()[0].action_execution_id;
    h.engine
        .on_action_completed(id, Outcome::Success, json!("first"))
        .await
        .unwrap();
    let task = h
        .engine
        .on_action_completed(id, Outcome::Error, json!("second"))
        .await
        .unwrap();

    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.result, Some(json!("first")));
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_pause_holds_successors_until_resume() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: pausable
tasks:
  - name: a
    action: std.async_noop
    on_success: [b]
  - name: b
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let paused = h
        .engine
        .stop_workflow_execution(wf.id, WorkflowState::Paused, false)
        .await
        .unwrap();
    assert_eq!(paused.state, WorkflowState::Paused);

    let id = h.executor.requests()[0].action_execution_id;
    h.engine
        .on_action_completed(id, Outcome::Success, json!(null))
        .await
        .unwrap();
    assert_eq!(h.task(wf.id, "a").await.state, TaskState::Success);
    assert_eq!(h.task(wf.id, "b").await.state, TaskState::Idle);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Paused);

    h.engine.resume_workflow_execution(wf.id).await.unwrap();
    assert_eq!(h.task(wf.id, "b").await.state, TaskState::Success);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_cancel_ignores_late_completion() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: cancellable
tasks:
  - name: a
    action: std.async_noop
"#,
            json!({}),
        )
        .await;

    h.engine
        .stop_workflow_execution(wf.id, WorkflowState::Cancelled, true)
        .await
        .unwrap();

    let id = h.executor.requests()[0].action_execution_id;
    let task = h
        .engine
        .on_action_completed(id, Outcome::Success, json!(null))
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Cancelled);

    let action = h.store.get_action_execution(id).await.unwrap().unwrap();
    assert!(action.accepted);
}

#[tokio::test]
async fn test_stop_rejects_other_targets() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: stoppable
tasks:
  - name: a
    action: std.async_noop
"#,
            json!({}),
        )
        .await;

    let result = h
        .engine
        .stop_workflow_execution(wf.id, WorkflowState::Success, false)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));
}

#[tokio::test]
async fn test_sub_workflow_result_flows_to_parent() {
    let h = harness();
    h.engine
        .register_workflow(
            parse_workflow(
                r#"
name: child
input:
  - value
output:
  doubled: "{{ value * 2 }}"
tasks:
  - name: step
    action: std.noop
"#,
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let wf = h
        .start(
            r#"
name: parent
tasks:
  - name: call
    workflow: child
    input:
      value: 21
"#,
            json!({}),
        )
        .await;

    let call = h.task(wf.id, "call").await;
    assert_eq!(call.state, TaskState::Success);
    assert_eq!(call.result, Some(json!({"doubled": 42})));
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_skip_cascades_to_successors() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: skippable
tasks:
  - name: a
    action: std.async_noop
    on_success: [b]
  - name: b
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let a = h.task(wf.id, "a").await;
    let skipped = h.engine.skip_task_execution(a.id).await.unwrap();
    assert_eq!(skipped.state, TaskState::Skipped);
    assert_eq!(h.task(wf.id, "b").await.state, TaskState::Skipped);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);

    let again = h.engine.skip_task_execution(a.id).await;
    assert!(matches!(again, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn test_task_completion_requires_outstanding_action() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: sync_only
tasks:
  - name: a
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let a = h.task(wf.id, "a").await;
    let result = h
        .engine
        .on_task_completed(a.id, Outcome::Success, json!(null))
        .await;
    assert!(matches!(result, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn test_missing_workflow_input_is_rejected() {
    let h = harness();
    let spec = parse_workflow(
        r#"
name: needs_input
input:
  - greeting
tasks:
  - name: a
    action: std.noop
"#,
    )
    .unwrap();

    let result = h
        .engine
        .start_workflow_execution(spec, JsonMap::new(), StartParams::default())
        .await;
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));
}

#[tokio::test]
async fn test_register_rejects_unknown_action() {
    let h = harness();
    let spec = parse_workflow(
        r#"
name: unknown
tasks:
  - name: a
    action: std.nothing_here
"#,
    )
    .unwrap();

    let result = h.engine.register_workflow(spec).await;
    assert!(matches!(result, Err(EngineError::Definition(_))));
}

#[tokio::test]
async fn test_subscribers_see_state_changes() {
    let h = harness();
    let mut events = h.engine.subscribe();
    let wf = h
        .start(
            r#"
name: announced
tasks:
  - name: a
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let running = events.recv().await.unwrap();
    assert_eq!(running.workflow_execution_id, wf.id);
    assert_eq!(running.state, WorkflowState::Running);
    let done = events.recv().await.unwrap();
    assert_eq!(done.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_target_task_runs_only_its_requirements() {
    let h = harness();
    let spec = parse_workflow(
        r#"
name: targeted
tasks:
  - name: a
    action: std.noop
  - name: b
    action: std.noop
    requires: [a]
  - name: unrelated
    action: std.noop
"#,
    )
    .unwrap();

    let wf = h
        .engine
        .start_workflow_execution(
            spec,
            JsonMap::new(),
            StartParams {
                task_name: Some("b".to_string()),
                env: JsonMap::new(),
            },
        )
        .await
        .unwrap();

    let names: Vec<String> = h
        .engine
        .get_task_executions(wf.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(names.contains(&"a".to_string()));
    assert!(names.contains(&"b".to_string()));
    assert!(!names.contains(&"unrelated".to_string()));
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_unhandled_error_waits_for_running_siblings() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: parallel_failure
tasks:
  - name: a
    action: std.fail
  - name: b
    action: std.async_noop
"#,
            json!({}),
        )
        .await;

    assert_eq!(h.task(wf.id, "a").await.state, TaskState::Error);
    assert_eq!(h.task(wf.id, "b").await.state, TaskState::Running);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Running);

    let id = h.executor.requests()[0].action_execution_id;
    let b = h
        .engine
        .on_action_completed(id, Outcome::Success, json!("done"))
        .await
        .unwrap();
    assert_eq!(b.state, TaskState::Success);

    let wf = h.workflow(wf.id).await;
    assert_eq!(wf.state, WorkflowState::Error);
    assert!(wf
        .state_info
        .unwrap()
        .starts_with("Failure caused by error in task 'a'"));
}

#[tokio::test]
async fn test_join_one_triggers_on_first_branch() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: discriminator
tasks:
  - name: task1
    action: std.async_noop
    on_success: [task3]
  - name: task2
    action: std.async_noop
    on_success: [task3]
  - name: task3
    join: one
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 2);

    h.engine
        .on_action_completed(requests[0].action_execution_id, Outcome::Success, json!(1))
        .await
        .unwrap();
    assert_eq!(h.task(wf.id, "task3").await.state, TaskState::Success);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Running);

    h.engine
        .on_action_completed(requests[1].action_execution_id, Outcome::Success, json!(2))
        .await
        .unwrap();
    assert_eq!(h.times_running(wf.id, "task3").await, 1);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_join_count_waits_for_threshold() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: partial_join
tasks:
  - name: a
    action: std.async_noop
    on_success: [j]
  - name: b
    action: std.async_noop
    on_success: [j]
  - name: c
    action: std.async_noop
    on_success: [j]
  - name: j
    join: 2
    action: std.noop
"#,
            json!({}),
        )
        .await;

    let requests = h.executor.requests();
    assert_eq!(requests.len(), 3);

    h.engine
        .on_action_completed(requests[0].action_execution_id, Outcome::Success, json!(null))
        .await
        .unwrap();
    assert_eq!(h.task(wf.id, "j").await.state, TaskState::Waiting);

    h.engine
        .on_action_completed(requests[1].action_execution_id, Outcome::Success, json!(null))
        .await
        .unwrap();
    assert_eq!(h.task(wf.id, "j").await.state, TaskState::Success);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Running);

    h.engine
        .on_action_completed(requests[2].action_execution_id, Outcome::Success, json!(null))
        .await
        .unwrap();
    assert_eq!(h.times_running(wf.id, "j").await, 1);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_wait_before_delays_first_dispatch() {
    let h = harness();
    let wf = h
        .start(
            r#"
name: patient
tasks:
  - name: a
    action: std.noop
    wait_before: 5
"#,
            json!({}),
        )
        .await;

    let a = h.task(wf.id, "a").await;
    assert_eq!(a.state, TaskState::Delayed);
    assert!(a.runtime_context.delay_until.is_some());
    assert_eq!(h.times_running(wf.id, "a").await, 0);

    h.engine.on_delay_elapsed(a.id).await.unwrap();
    assert_eq!(h.task(wf.id, "a").await.state, TaskState::Success);

    // A stale timer is a no-op.
    h.engine.on_delay_elapsed(a.id).await.unwrap();
    assert_eq!(h.times_running(wf.id, "a").await, 1);

    let trace = h.engine.get_transitions(wf.id).await.unwrap();
    let tasks: Vec<&TransitionRecord> = trace.iter().filter(|r| r.entity == EntityKind::Task).collect();
    let delayed = tasks.iter().position(|r| r.is("a", "IDLE", "DELAYED")).unwrap();
    let released = tasks.iter().position(|r| r.is("a", "DELAYED", "IDLE")).unwrap();
    let running = tasks.iter().position(|r| r.is("a", "IDLE", "RUNNING")).unwrap();
    assert!(delayed < released && released < running);
    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Success);
}

#[tokio::test]
async fn test_rejected_dispatch_is_an_error_and_retried() {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(RejectingExecutor {
        rejections: AtomicUsize::new(1),
        accepted: RecordingExecutor::default(),
    });
    let engine = engine_with(store, executor.clone());

    let spec = parse_workflow(
        r#"
name: refused
tasks:
  - name: a
    action: std.async_noop
    retry:
      count: 1
"#,
    )
    .unwrap();
    let wf = engine
        .start_workflow_execution(spec, JsonMap::new(), StartParams::default())
        .await
        .unwrap();

    let a = engine.get_task_executions(wf.id).await.unwrap().remove(0);
    assert_eq!(a.state, TaskState::Running);
    assert_eq!(a.runtime_context.attempts, 2);
    assert_eq!(a.runtime_context.retry_no, 0);

    let trace = engine.get_transitions(wf.id).await.unwrap();
    let failed_actions = trace
        .iter()
        .filter(|r| r.entity == EntityKind::Action && r.state == "ERROR")
        .count();
    assert_eq!(failed_actions, 1);

    let accepted = executor.accepted.requests();
    assert_eq!(accepted.len(), 1);
    let a = engine
        .on_action_completed(accepted[0].action_execution_id, Outcome::Success, json!("ok"))
        .await
        .unwrap();
    assert_eq!(a.state, TaskState::Success);
    assert_eq!(engine.get_workflow_execution_state(wf.id).await.unwrap(), WorkflowState::Success);
}

#[tokio::test]
async fn test_transient_commit_failure_is_retried() {
    let store = Arc::new(FaultyStore::default());
    store.commit_failures.store(1, Ordering::SeqCst);
    let engine = engine_with(store.clone(), Arc::new(RecordingExecutor::default()));

    let spec = parse_workflow(
        r#"
name: conflicted
tasks:
  - name: a
    action: std.noop
"#,
    )
    .unwrap();
    let wf = engine
        .start_workflow_execution(spec, JsonMap::new(), StartParams::default())
        .await
        .unwrap();

    assert_eq!(store.commit_failures.load(Ordering::SeqCst), 0);
    assert_eq!(engine.get_workflow_execution_state(wf.id).await.unwrap(), WorkflowState::Success);

    // The failed attempt left no duplicate records behind.
    let trace = engine.get_transitions(wf.id).await.unwrap();
    let started = trace
        .iter()
        .filter(|r| r.entity == EntityKind::Workflow && r.state == "RUNNING")
        .count();
    assert_eq!(started, 1);
    assert_eq!(engine.get_task_executions(wf.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transient_failures_give_up_after_configured_attempts() {
    let store = Arc::new(FaultyStore::default());
    store.commit_failures.store(10, Ordering::SeqCst);
    let engine = engine_with(store.clone(), Arc::new(RecordingExecutor::default()));

    let spec = parse_workflow("name: busy\ntasks:\n  - name: a\n    action: std.noop\n").unwrap();
    let result = engine
        .start_workflow_execution(spec, JsonMap::new(), StartParams::default())
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));

    let begun = store.begun.lock().unwrap().clone();
    assert_eq!(begun.len(), EngineConfig::default().store_retry_attempts as usize);
    assert!(store.get_workflow_execution(begun[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_write_leaves_no_partial_execution() {
    let store = Arc::new(FaultyStore::default());
    store.fail_task_writes.store(true, Ordering::SeqCst);
    let executor = Arc::new(RecordingExecutor::default());
    let engine = engine_with(store.clone(), executor.clone());

    let spec = parse_workflow(
        r#"
name: unwritable
tasks:
  - name: a
    action: std.async_noop
"#,
    )
    .unwrap();
    let result = engine
        .start_workflow_execution(spec, JsonMap::new(), StartParams::default())
        .await;
    assert!(matches!(result, Err(EngineError::Store(_))));

    let begun = store.begun.lock().unwrap().clone();
    assert_eq!(begun.len(), 1);
    let id = begun[0];
    assert!(store.get_workflow_execution(id).await.unwrap().is_none());
    assert!(store.list_task_executions(id).await.unwrap().is_empty());
    assert!(store.list_transitions(id).await.unwrap().is_empty());
    assert!(executor.requests().is_empty());
}

async fn start_with_slow_child(h: &Harness) -> (WorkflowExecution, Uuid) {
    h.engine
        .register_workflow(
            parse_workflow(
                r#"
name: slow_child
tasks:
  - name: work
    action: std.async_noop
"#,
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let wf = h
        .start(
            r#"
name: slow_parent
tasks:
  - name: call
    workflow: slow_child
"#,
            json!({}),
        )
        .await;

    let child_id = h.executor.requests()[0].workflow_execution_id;
    let child = h.workflow(child_id).await;
    assert_eq!(child.parent.map(|p| p.workflow_execution_id), Some(wf.id));
    (wf, child_id)
}

#[tokio::test]
async fn test_recursive_cancel_reaches_sub_workflow() {
    let h = harness();
    let (wf, child_id) = start_with_slow_child(&h).await;

    h.engine
        .stop_workflow_execution(wf.id, WorkflowState::Cancelled, true)
        .await
        .unwrap();

    assert_eq!(h.workflow(wf.id).await.state, WorkflowState::Cancelled);
    let child = h.workflow(child_id).await;
    assert_eq!(child.state, WorkflowState::Cancelled);
    assert_eq!(
        child.state_info.as_deref(),
        Some("Cancelled with parent workflow execution")
    );
    assert_eq!(h.task(wf.id, "call").await.state, TaskState::Running);
}

#[tokio::test]
async fn test_cancelled_sub_workflow_fails_parent_task() {
    let h = harness();
    let (wf, child_id) = start_with_slow_child(&h).await;

    h.engine
        .stop_workflow_execution(child_id, WorkflowState::Cancelled, false)
        .await
        .unwrap();

    assert_eq!(h.task(wf.id, "call").await.state, TaskState::Error);
    let wf = h.workflow(wf.id).await;
    assert_eq!(wf.state, WorkflowState::Error);
    assert!(wf.state_info.unwrap().contains("'call'"));
}

#[tokio::test]
async fn test_unregistered_spec_is_compiled_once() {
    let h = harness();
    let spec = parse_workflow("name: adhoc\ntasks:\n  - name: a\n    action: std.noop\n").unwrap();

    let first = h.engine.definition_for(&spec).await.unwrap();
    let second = h.engine.definition_for(&spec).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let edited = parse_workflow("name: adhoc\ntasks:\n  - name: b\n    action: std.noop\n").unwrap();
    let third = h.engine.definition_for(&edited).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.spec, edited);
}
