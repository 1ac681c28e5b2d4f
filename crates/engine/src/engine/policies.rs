//! Retry and repeat policies.
//!
//! Applied to every raw attempt outcome before the task's state is
//! finalized. Retries count per repeat iteration: a new iteration starts
//! with a fresh retry budget.

use std::time::Duration;

use tracing::{debug, warn};

use crate::db::models::{RuntimeContext, TaskState};
use crate::spec::{JsonMap, TaskSpec};

use super::evaluator::Evaluator;

/// Raw outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    /// The terminal task state this outcome maps to.
    pub fn task_state(self) -> TaskState {
        match self {
            Outcome::Success => TaskState::Success,
            Outcome::Error => TaskState::Error,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.task_state())
    }
}

/// What to do with the task after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Run the task again after `delay` (zero means immediately).
    Rerun { delay: Duration },
    /// The task is done in this state.
    Final(TaskState),
}

/// Decide the next step for a task after an attempt with `outcome`.
///
/// `outbound` is the context `break_on` is evaluated against. Counters in
/// `runtime` are advanced in place when a rerun is chosen.
pub fn apply_policies(
    task: &TaskSpec,
    runtime: &mut RuntimeContext,
    outcome: Outcome,
    evaluator: &dyn Evaluator,
    outbound: &JsonMap,
) -> PolicyDecision {
    if outcome == Outcome::Error {
        if let Some(retry) = &task.retry {
            let used = runtime.retry_no - runtime.iteration_retry_start;
            if used < i64::from(retry.count)
                && !breaks(evaluator, retry.break_on.as_deref(), outbound, &task.name)
            {
                runtime.retry_no += 1;
                debug!(task = %task.name, retry_no = runtime.retry_no, "Retrying task");
                return PolicyDecision::Rerun {
                    delay: Duration::from_secs(retry.delay),
                };
            }
        }
    }

    if let Some(repeat) = &task.repeat {
        if runtime.iteration_no + 1 < i64::from(repeat.iterations)
            && !breaks(evaluator, repeat.break_on.as_deref(), outbound, &task.name)
        {
            runtime.iteration_no += 1;
            runtime.iteration_retry_start = runtime.retry_no;
            debug!(task = %task.name, iteration_no = runtime.iteration_no, "Repeating task");
            return PolicyDecision::Rerun {
                delay: Duration::from_secs(repeat.delay),
            };
        }
    }

    PolicyDecision::Final(outcome.task_state())
}

/// Evaluate a `break_on` condition; failures count as not breaking.
fn breaks(evaluator: &dyn Evaluator, condition: Option<&str>, context: &JsonMap, task: &str) -> bool {
    let Some(condition) = condition else {
        return false;
    };
    evaluator
        .evaluate_condition(condition, context)
        .unwrap_or_else(|e| {
            warn!(task = %task, condition = %condition, error = %e, "break_on evaluation failed");
            false
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluator::JinjaEvaluator;
    use crate::spec::{RepeatSpec, RetrySpec};
    use serde_json::json;

    fn first_attempt() -> RuntimeContext {
        RuntimeContext {
            iteration_no: 0,
            ..RuntimeContext::default()
        }
    }

    #[test]
    fn test_retry_bound() {
        let ev = JinjaEvaluator::new();
        let mut task = TaskSpec::action("t", "std.fail");
        task.retry = Some(RetrySpec {
            count: 3,
            delay: 1,
            break_on: None,
        });
        let mut rc = first_attempt();

        let mut reruns = 0;
        loop {
            match apply_policies(&task, &mut rc, Outcome::Error, &ev, &JsonMap::new()) {
                PolicyDecision::Rerun { delay } => {
                    assert_eq!(delay, Duration::from_secs(1));
                    reruns += 1;
                }
                PolicyDecision::Final(state) => {
                    assert_eq!(state, TaskState::Error);
                    break;
                }
            }
        }
        assert_eq!(reruns, 3);
        assert_eq!(rc.retry_no, 2);
    }

    #[test]
    fn test_success_is_not_retried() {
        let ev = JinjaEvaluator::new();
        let mut task = TaskSpec::action("t", "std.noop");
        task.retry = Some(RetrySpec {
            count: 3,
            delay: 0,
            break_on: None,
        });
        let mut rc = first_attempt();
        assert_eq!(
            apply_policies(&task, &mut rc, Outcome::Success, &ev, &JsonMap::new()),
            PolicyDecision::Final(TaskState::Success)
        );
        assert_eq!(rc.retry_no, -1);
    }

    #[test]
    fn test_repeat_break_on() {
        let ev = JinjaEvaluator::new();
        let mut task = TaskSpec::action("t", "std.noop");
        task.repeat = Some(RepeatSpec {
            iterations: 5,
            delay: 0,
            break_on: Some("{{ n == 2 }}".to_string()),
        });
        let mut rc = first_attempt();
        let ctx = |n: i64| json!({"n": n}).as_object().cloned().unwrap();

        assert_eq!(
            apply_policies(&task, &mut rc, Outcome::Success, &ev, &ctx(1)),
            PolicyDecision::Rerun {
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            apply_policies(&task, &mut rc, Outcome::Success, &ev, &ctx(2)),
            PolicyDecision::Final(TaskState::Success)
        );
        assert_eq!(rc.iteration_no, 1);
    }

    #[test]
    fn test_retry_budget_resets_per_iteration() {
        let ev = JinjaEvaluator::new();
        let mut task = TaskSpec::action("t", "std.fail");
        task.retry = Some(RetrySpec {
            count: 1,
            delay: 0,
            break_on: None,
        });
        task.repeat = Some(RepeatSpec {
            iterations: 2,
            delay: 0,
            break_on: None,
        });
        let mut rc = first_attempt();
        let ctx = JsonMap::new();

        // iteration 0: one retry, then the exhausted error moves to iteration 1
        assert!(matches!(apply_policies(&task, &mut rc, Outcome::Error, &ev, &ctx), PolicyDecision::Rerun { .. }));
        assert!(matches!(apply_policies(&task, &mut rc, Outcome::Error, &ev, &ctx), PolicyDecision::Rerun { .. }));
        assert_eq!(rc.iteration_no, 1);
        // iteration 1 gets its own retry
        assert!(matches!(apply_policies(&task, &mut rc, Outcome::Error, &ev, &ctx), PolicyDecision::Rerun { .. }));
        assert_eq!(
            apply_policies(&task, &mut rc, Outcome::Error, &ev, &ctx),
            PolicyDecision::Final(TaskState::Error)
        );
        assert_eq!(rc.retry_no, 1);
    }
}
