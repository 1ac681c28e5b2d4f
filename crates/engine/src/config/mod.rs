//! Configuration loading from environment variables.
//!
//! Uses the `envy` crate for type-safe environment variable parsing.

mod database;
mod engine;

pub use database::DatabaseConfig;
pub use engine::{EngineConfig, StoreKind};
