//! taskweave Action Library
//!
//! The unit of work a workflow task delegates to.
//!
//! This crate provides:
//! - The [`Action`] contract (`run` / `test` / `is_sync`)
//! - A statically-typed [`ActionRegistry`] populated from a fixed list of providers
//! - The standard provider (`std.echo`, `std.noop`, `std.fail`, `std.async_noop`, `std.sleep`)

pub mod builtin;
pub mod context;
pub mod error;
pub mod registry;

pub use builtin::{create_default_registry, StdProvider};
pub use context::ActionContext;
pub use error::ActionError;
pub use registry::{Action, ActionDescriptor, ActionProvider, ActionRegistry, ParamSpec};
