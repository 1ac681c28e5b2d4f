//! Workflow execution engine.
//!
//! - **Orchestrator**: transactional operations and post-commit dispatch
//! - **Execution**: one workflow execution loaded inside a transaction
//! - **Resolver**: graph resolution over a task snapshot
//! - **Policies**: retry and repeat decisions
//! - **Scheduler**: timers for delayed tasks

pub mod commands;
pub mod data_flow;
pub mod evaluator;
pub mod execution;
pub mod join;
pub mod orchestrator;
pub mod policies;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod with_items;

pub use commands::{Command, DispatchPlan};
pub use evaluator::{Evaluator, JinjaEvaluator};
pub use execution::{RunChanges, WorkflowRun};
pub use orchestrator::{Engine, StartParams, WorkflowEvent};
pub use policies::{Outcome, PolicyDecision};
pub use scheduler::{DelayQueue, ScheduledDelay, SchedulerLoop, TaskScheduler};
