//! Logging helpers for `Result`.

use std::fmt::Display;
use std::panic::Location;

use tracing::Level;

/// Logs the `Err` side of a `Result` with a context message and the
/// caller's source location, then hands the result back unchanged.
///
/// ```ignore
/// use taskweave_engine::ResultExt;
///
/// let tx = store.begin(id).await.log("opening transaction")?;
/// ```
pub trait ResultExt<T, E> {
    /// Log an error at ERROR level.
    fn log<S: ToString>(self, context: S) -> Result<T, E>;

    /// Log an error at WARN level, for failures the caller tolerates.
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(e) = &self {
            emit(Level::ERROR, e, &context.to_string(), Location::caller());
        }
        self
    }

    #[track_caller]
    fn log_warn<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(e) = &self {
            emit(Level::WARN, e, &context.to_string(), Location::caller());
        }
        self
    }
}

fn emit(level: Level, error: &dyn Display, context: &str, at: &Location<'_>) {
    let at = format!("{}:{}", at.file(), at.line());
    // tracing needs a constant level per callsite
    if level == Level::ERROR {
        tracing::error!(target: "taskweave_engine", error = %error, at = %at, context, "Operation failed");
    } else {
        tracing::warn!(target: "taskweave_engine", error = %error, at = %at, context, "Operation failed");
    }
}
