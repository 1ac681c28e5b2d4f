//! Execution records.
//!
//! Tagged structs per entity, persisted by the Store collaborator.

mod action;
mod task;
mod trace;
mod workflow;

pub use action::{ActionExecution, ActionState};
pub use task::{RuntimeContext, TaskExecution, TaskState, WithItemsProgress};
pub use trace::{EntityKind, TransitionRecord};
pub use workflow::{ParentLink, WorkflowExecution, WorkflowState};
