use async_trait::async_trait;
use std::time::Duration;

use crate::context::ActionContext;
use crate::error::ActionError;
use crate::registry::{Action, ActionDescriptor};

/// Sleeps for `seconds` (fractional allowed) and returns null.
pub struct SleepAction {
    descriptor: ActionDescriptor,
}

impl SleepAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionDescriptor::new("std.sleep")
                .with_description("Sleep for a number of seconds")
                .required("seconds"),
        }
    }
}

impl Default for SleepAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for SleepAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &ActionContext) -> Result<serde_json::Value, ActionError> {
        let seconds = ctx
            .get_input("seconds")
            .and_then(|v| v.as_f64())
            .filter(|s| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| {
                ActionError::InvalidInput("'seconds' must be a non-negative number".to_string())
            })?;

        tracing::debug!(task = %ctx.task_name, seconds, "Sleeping");
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(serde_json::Value::Null)
    }
}
