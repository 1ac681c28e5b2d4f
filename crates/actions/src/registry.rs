//! Action registry and dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ActionContext;
use crate::error::ActionError;

/// Declared input parameter of an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,

    /// Whether the task must supply a value.
    #[serde(default)]
    pub required: bool,

    /// Value used when the task omits the parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// Statically-typed description of an action: name, input schema, sync flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Fully qualified action name (e.g. `std.echo`).
    pub name: String,

    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input schema.
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    /// Whether the engine may run the action inline.
    #[serde(default)]
    pub sync: bool,
}

impl ActionDescriptor {
    /// Create a descriptor with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            params: Vec::new(),
            sync: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the action as synchronous.
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Declare a required parameter.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required: true,
            default: None,
        });
        self
    }

    /// Declare an optional parameter with a default value.
    pub fn optional(mut self, name: impl Into<String>, default: serde_json::Value) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required: false,
            default: Some(default),
        });
        self
    }

    /// Names of the parameters a caller must supply.
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// Whether `name` is a required parameter.
    pub fn is_required(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.required && p.name == name)
    }

    /// Validate input against the schema and fill in defaults.
    pub fn bind_input(
        &self,
        input: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ActionError> {
        let mut bound = input.clone();

        for param in &self.params {
            if bound.contains_key(&param.name) {
                continue;
            }
            match (&param.default, param.required) {
                (Some(default), _) => {
                    bound.insert(param.name.clone(), default.clone());
                }
                (None, true) => {
                    return Err(ActionError::InvalidInput(format!(
                        "missing required parameter '{}' for action '{}'",
                        param.name, self.name
                    )));
                }
                (None, false) => {}
            }
        }

        if let Some(unknown) = bound
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(ActionError::InvalidInput(format!(
                "unexpected parameter '{}' for action '{}'",
                unknown, self.name
            )));
        }

        Ok(bound)
    }
}

/// Action trait for implementing units of work.
#[async_trait]
pub trait Action: Send + Sync {
    /// The action's descriptor.
    fn descriptor(&self) -> &ActionDescriptor;

    /// Run the action.
    async fn run(&self, ctx: &ActionContext) -> Result<serde_json::Value, ActionError>;

    /// Produce a sample result without side effects.
    fn test(&self, _ctx: &ActionContext) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Whether the action completes inline.
    fn is_sync(&self) -> bool {
        self.descriptor().sync
    }
}

/// A fixed family of actions registered together at process start.
pub trait ActionProvider: Send + Sync {
    /// Provider name, used for logging.
    fn name(&self) -> &'static str;

    /// The actions this provider contributes.
    fn actions(&self) -> Vec<Arc<dyn Action>>;
}

/// Registry of available actions keyed by name.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create a new empty action registry.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Build a registry by iterating a fixed provider list.
    pub fn from_providers(providers: &[&dyn ActionProvider]) -> Self {
        let mut registry = Self::new();
        for provider in providers {
            let actions = provider.actions();
            tracing::debug!(
                provider = provider.name(),
                count = actions.len(),
                "Registering action provider"
            );
            for action in actions {
                registry.register_arc(action);
            }
        }
        registry
    }

    /// Register an action.
    pub fn register<A: Action + 'static>(&mut self, action: A) {
        self.register_arc(Arc::new(action));
    }

    /// Register a shared action.
    pub fn register_arc(&mut self, action: Arc<dyn Action>) {
        let name = action.descriptor().name.clone();
        if self.actions.insert(name.clone(), action).is_some() {
            tracing::warn!(action = %name, "Action registered twice, keeping the latest");
        }
    }

    /// Get an action by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Get an action's descriptor by name.
    pub fn descriptor(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.get(name).map(|a| a.descriptor())
    }

    /// Check if an action is registered.
    pub fn has(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// List all registered action names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Run an action by name after binding its input.
    pub async fn run(
        &self,
        name: &str,
        ctx: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let action = self
            .get(name)
            .ok_or_else(|| ActionError::NotFound(name.to_string()))?;
        let bound = ctx.clone().with_input(action.descriptor().bind_input(&ctx.input)?);
        action.run(&bound).await
    }

    /// Produce an action's sample result by name.
    pub fn test(&self, name: &str, ctx: &ActionContext) -> Result<serde_json::Value, ActionError> {
        let action = self
            .get(name)
            .ok_or_else(|| ActionError::NotFound(name.to_string()))?;
        Ok(action.test(ctx))
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.list())
            .finish()
    }
}
