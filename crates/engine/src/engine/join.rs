//! Join and requirement evaluation.
//!
//! Decides from the states of a task's predecessors whether it can run,
//! must keep waiting, or can never run.

use crate::db::models::TaskState;
use crate::spec::Join;

/// State of the edge set from one source task to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStatus {
    /// Source has not finished yet.
    Pending,
    /// Source finished and at least one of its edges to the target matched.
    Fired,
    /// Source finished without reaching the target, was skipped, or
    /// will never run in this execution.
    Dead,
}

impl EdgeStatus {
    /// Classify a source from its state and whether it selected the target.
    ///
    /// `None` is a source that is not materialized in this execution.
    pub fn of(source: Option<TaskState>, selected_target: bool) -> Self {
        match source {
            None | Some(TaskState::Skipped) => EdgeStatus::Dead,
            Some(TaskState::Success) | Some(TaskState::Error) if selected_target => EdgeStatus::Fired,
            Some(TaskState::Success) | Some(TaskState::Error) => EdgeStatus::Dead,
            Some(_) => EdgeStatus::Pending,
        }
    }
}

/// Whether a task can be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Some inbound branches fired, the join threshold is not met yet.
    Waiting,
    /// Nothing fired yet.
    Blocked,
    /// The trigger condition can no longer be satisfied.
    Unreachable,
}

impl Readiness {
    /// Both conditions must hold.
    pub fn and(self, other: Readiness) -> Readiness {
        use Readiness::*;
        match (self, other) {
            (Unreachable, _) | (_, Unreachable) => Unreachable,
            (Ready, Ready) => Ready,
            (Waiting, _) | (_, Waiting) => Waiting,
            _ => Blocked,
        }
    }
}

/// Evaluate the inbound transitions of a task under its join mode.
///
/// A task without inbound transitions is trivially ready.
pub fn evaluate_join(join: Option<Join>, sources: &[EdgeStatus]) -> Readiness {
    if sources.is_empty() {
        return Readiness::Ready;
    }

    let fired = sources.iter().filter(|s| **s == EdgeStatus::Fired).count();
    let pending = sources.iter().filter(|s| **s == EdgeStatus::Pending).count();

    match join {
        None => {
            if fired > 0 {
                Readiness::Ready
            } else if pending == 0 {
                Readiness::Unreachable
            } else {
                Readiness::Blocked
            }
        }
        Some(Join::All) => match (pending, fired) {
            (0, 0) => Readiness::Unreachable,
            (0, _) => Readiness::Ready,
            (_, 0) => Readiness::Blocked,
            _ => Readiness::Waiting,
        },
        Some(join) => {
            let threshold = join.threshold().unwrap_or(1);
            if fired >= threshold {
                Readiness::Ready
            } else if fired + pending < threshold {
                Readiness::Unreachable
            } else if fired > 0 {
                Readiness::Waiting
            } else {
                Readiness::Blocked
            }
        }
    }
}

/// Evaluate a task's `requires` list: every required task must succeed.
///
/// `None` entries are required tasks not materialized in this execution.
pub fn evaluate_requires<I>(required: I) -> Readiness
where
    I: IntoIterator<Item = Option<TaskState>>,
{
    let mut readiness = Readiness::Ready;
    for state in required {
        match state {
            Some(TaskState::Success) => {}
            None | Some(TaskState::Error) | Some(TaskState::Skipped) => return Readiness::Unreachable,
            Some(_) => readiness = Readiness::Blocked,
        }
    }
    readiness
}
