use async_trait::async_trait;

use crate::context::ActionContext;
use crate::error::ActionError;
use crate::registry::{Action, ActionDescriptor};

/// Returns its `output` parameter unchanged.
pub struct EchoAction {
    descriptor: ActionDescriptor,
}

impl EchoAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionDescriptor::new("std.echo")
                .with_description("Return the given output")
                .required("output")
                .sync(),
        }
    }
}

impl Default for EchoAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for EchoAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &ActionContext) -> Result<serde_json::Value, ActionError> {
        Ok(ctx.get_input("output").cloned().unwrap_or_default())
    }

    fn test(&self, ctx: &ActionContext) -> serde_json::Value {
        ctx.get_input("output").cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_echo_returns_output() {
        let mut input = serde_json::Map::new();
        input.insert("output".to_string(), serde_json::json!({"a": [1, 2]}));
        let ctx = ActionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "echo")
            .with_input(input);

        let result = EchoAction::new().run(&ctx).await.unwrap();
        assert_eq!(result, serde_json::json!({"a": [1, 2]}));
    }
}
