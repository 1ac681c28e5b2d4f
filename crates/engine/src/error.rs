//! Error types for the taskweave engine.
//!
//! Action failures are not engine errors: they become ERROR outcomes of
//! action executions. Everything here aborts the surrounding transaction.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed workflow definition (fatal at creation time)
    #[error("Definition error: {0}")]
    Definition(String),

    /// Workflow input or start parameters rejected
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Expression evaluation failure
    #[error("Expression error: {0}")]
    Expression(String),

    /// Template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Store collaborator failure
    #[error("Store error: {0}")]
    Store(String),

    /// Concurrent modification detected by the store
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parse error (YAML, JSON, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Executor collaborator failure
    #[error("Executor error: {0}")]
    Executor(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Definition(_) => "DEFINITION_ERROR",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::InvalidState(_) => "INVALID_STATE",
            EngineError::Expression(_) => "EXPRESSION_ERROR",
            EngineError::Template(_) => "TEMPLATE_ERROR",
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Parse(_) => "PARSE_ERROR",
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Executor(_) => "EXECUTOR_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the whole transaction may succeed.
    ///
    /// Covers serialization failures (40001), deadlocks (40P01) and pool
    /// acquire timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Conflict(_) => true,
            EngineError::Database(sqlx::Error::PoolTimedOut) => true,
            EngineError::Database(sqlx::Error::Database(db)) => {
                // serialization_failure, deadlock_detected, lock_not_available
                matches!(
                    db.code().as_deref(),
                    Some("40001") | Some("40P01") | Some("55P03")
                )
            }
            _ => false,
        }
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<minijinja::Error> for EngineError {
    fn from(err: minijinja::Error) -> Self {
        EngineError::Template(err.to_string())
    }
}
