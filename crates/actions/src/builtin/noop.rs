use async_trait::async_trait;

use crate::context::ActionContext;
use crate::error::ActionError;
use crate::registry::{Action, ActionDescriptor};

/// Does nothing and completes inline.
pub struct NoopAction {
    descriptor: ActionDescriptor,
}

impl NoopAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionDescriptor::new("std.noop")
                .with_description("Do nothing")
                .sync(),
        }
    }
}

impl Default for NoopAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for NoopAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn run(&self, _ctx: &ActionContext) -> Result<serde_json::Value, ActionError> {
        Ok(serde_json::Value::Null)
    }
}

/// Does nothing, but as an asynchronous action.
///
/// The engine hands it to the executor and waits for an external
/// completion, which makes it useful for driving workflows by hand.
pub struct AsyncNoopAction {
    descriptor: ActionDescriptor,
}

impl AsyncNoopAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionDescriptor::new("std.async_noop")
                .with_description("Do nothing, complete asynchronously"),
        }
    }
}

impl Default for AsyncNoopAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for AsyncNoopAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn run(&self, _ctx: &ActionContext) -> Result<serde_json::Value, ActionError> {
        Ok(serde_json::Value::Null)
    }
}
