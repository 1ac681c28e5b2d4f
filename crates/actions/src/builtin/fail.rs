use async_trait::async_trait;

use crate::context::ActionContext;
use crate::error::ActionError;
use crate::registry::{Action, ActionDescriptor};

/// Always fails. `error_data`, when given, becomes the failure result.
pub struct FailAction {
    descriptor: ActionDescriptor,
}

impl FailAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionDescriptor::new("std.fail")
                .with_description("Fail with optional error data")
                .optional("error_data", serde_json::Value::Null)
                .sync(),
        }
    }
}

impl Default for FailAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for FailAction {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn run(&self, ctx: &ActionContext) -> Result<serde_json::Value, ActionError> {
        let data = ctx
            .get_input("error_data")
            .filter(|v| !v.is_null())
            .cloned();
        Err(ActionError::Failed {
            message: format!("task '{}' failed deliberately", ctx.task_name),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_fail_carries_error_data() {
        let mut input = serde_json::Map::new();
        input.insert("error_data".to_string(), serde_json::json!("bad input"));
        let ctx = ActionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "t")
            .with_input(input);

        let err = FailAction::new().run(&ctx).await.unwrap_err();
        assert_eq!(err.to_result_value(), serde_json::json!("bad input"));
    }
}
