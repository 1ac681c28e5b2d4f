//! taskweave Engine Library
//!
//! A transactional workflow execution engine. Workflows are directed
//! graphs of tasks connected by conditional transitions and `requires`
//! dependencies; each task delegates to an action or a nested workflow.
//!
//! ## Architecture
//!
//! Every engine operation runs in a store transaction scoped to one
//! workflow execution. The transaction produces a dispatch plan (actions
//! to run, timers to set, parents to notify) that the engine executes
//! only after commit.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Store collaborator, execution records and backends
//! - [`engine`]: Orchestration, graph resolution and policies
//! - [`executor`]: Executor collaborator and the local executor
//! - [`spec`]: Workflow definitions and graph compilation
//! - [`template`]: Jinja expression evaluation
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskweave_engine::{config::EngineConfig, db::MemoryStore, engine::Engine, executor::LocalExecutor};
//!
//! let config = EngineConfig::from_env()?;
//! let registry = Arc::new(taskweave_actions::create_default_registry());
//! let (executor, completions) = LocalExecutor::new(registry.clone(), &config);
//! let engine = Arc::new(Engine::new(Arc::new(MemoryStore::new()), Arc::new(executor), registry, config));
//! engine.clone().start(completions).await?;
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod result_ext;
pub mod spec;
pub mod template;

pub use error::{EngineError, EngineResult};
pub use result_ext::ResultExt;
