//! In-memory workflow definition types.
//!
//! A workflow is a list of tasks. Tasks are linked either by `requires`
//! (requirement graphs) or by `on_success` / `on_error` / `on_complete`
//! transitions recorded on the predecessor (transition graphs). Both
//! styles may be mixed in one workflow.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// JSON object used for task inputs, publish blocks and outputs.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Workflow
// ============================================================================

/// A named, versioned task graph plus input/output declarations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSpec {
    /// Workflow name, used to reference it as a sub-workflow.
    pub name: String,

    /// Namespace the workflow belongs to.
    #[serde(default)]
    pub namespace: String,

    /// Version label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared input parameters.
    #[serde(default)]
    pub input: Vec<InputParam>,

    /// Output expressions evaluated against the terminal context.
    #[serde(default)]
    pub output: JsonMap,

    /// Tasks, in declaration order.
    pub tasks: Vec<TaskSpec>,
}

impl WorkflowSpec {
    /// Get a task by name.
    pub fn get_task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Declared workflow input parameter.
///
/// Written either as a bare name (required) or as `{name: default}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "InputParamRepr", into = "InputParamRepr")]
pub struct InputParam {
    pub name: String,
    pub default: Option<serde_json::Value>,
}

impl InputParam {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum InputParamRepr {
    Name(String),
    WithDefault(BTreeMap<String, serde_json::Value>),
}

impl TryFrom<InputParamRepr> for InputParam {
    type Error = String;

    fn try_from(repr: InputParamRepr) -> Result<Self, Self::Error> {
        match repr {
            InputParamRepr::Name(name) => Ok(InputParam::required(name)),
            InputParamRepr::WithDefault(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((name, default)), None) => Ok(InputParam::with_default(name, default)),
                    _ => Err("input parameter with a default must be a single-entry map".to_string()),
                }
            }
        }
    }
}

impl From<InputParam> for InputParamRepr {
    fn from(param: InputParam) -> Self {
        match param.default {
            None => InputParamRepr::Name(param.name),
            Some(default) => InputParamRepr::WithDefault(BTreeMap::from([(param.name, default)])),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// A node in the workflow graph bound to an action or a sub-workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskSpec {
    /// Task name, unique within the workflow.
    pub name: String,

    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Action to run (e.g. `std.echo`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Registered workflow to run as a nested execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    /// Action or sub-workflow input; string values may be expressions.
    #[serde(default)]
    pub input: JsonMap,

    /// Variables published into the outbound context on success.
    #[serde(default)]
    pub publish: JsonMap,

    /// Tasks that must reach SUCCESS first.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Transitions taken when the task succeeds.
    #[serde(default, alias = "on-success")]
    pub on_success: Vec<Transition>,

    /// Transitions taken when the task fails.
    #[serde(default, alias = "on-error")]
    pub on_error: Vec<Transition>,

    /// Transitions taken on either outcome.
    #[serde(default, alias = "on-complete", alias = "on_finish", alias = "on-finish")]
    pub on_complete: Vec<Transition>,

    /// Synchronization over inbound transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Join>,

    /// Retry policy applied to ERROR outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,

    /// Fixed-count repetition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatSpec>,

    /// Fan-out over a collection.
    #[serde(default, alias = "with-items", skip_serializing_if = "Option::is_none")]
    pub with_items: Option<WithItemsSpec>,

    /// Seconds to wait before the first dispatch.
    #[serde(default, alias = "wait-before")]
    pub wait_before: u64,

    /// Per-action timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl TaskSpec {
    /// Create a task bound to an action.
    pub fn action(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: Some(action.into()),
            ..Default::default()
        }
    }

    /// All outbound transitions with their kind.
    pub fn transitions(&self) -> impl Iterator<Item = (TransitionKind, &Transition)> {
        self.on_success
            .iter()
            .map(|t| (TransitionKind::OnSuccess, t))
            .chain(self.on_error.iter().map(|t| (TransitionKind::OnError, t)))
            .chain(self.on_complete.iter().map(|t| (TransitionKind::OnComplete, t)))
    }
}

/// Which outcome an outbound transition listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    OnSuccess,
    OnError,
    OnComplete,
}

/// Outbound transition to a successor task with an optional guard.
///
/// Written either as a bare task name or as `{task_name: guard}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "TransitionRepr", into = "TransitionRepr")]
pub struct Transition {
    pub task: String,
    pub when: Option<String>,
}

impl Transition {
    pub fn to(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            when: None,
        }
    }

    pub fn when(task: impl Into<String>, guard: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            when: Some(guard.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TransitionRepr {
    Name(String),
    Guarded(BTreeMap<String, String>),
}

impl TryFrom<TransitionRepr> for Transition {
    type Error = String;

    fn try_from(repr: TransitionRepr) -> Result<Self, Self::Error> {
        match repr {
            TransitionRepr::Name(task) => Ok(Transition::to(task)),
            TransitionRepr::Guarded(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((task, guard)), None) => Ok(Transition::when(task, guard)),
                    _ => Err("guarded transition must be a single-entry map".to_string()),
                }
            }
        }
    }
}

impl From<Transition> for TransitionRepr {
    fn from(t: Transition) -> Self {
        match t.when {
            None => TransitionRepr::Name(t.task),
            Some(guard) => TransitionRepr::Guarded(BTreeMap::from([(t.task, guard)])),
        }
    }
}

// ============================================================================
// Modifiers
// ============================================================================

/// Join mode over inbound transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "JoinRepr", into = "JoinRepr")]
pub enum Join {
    /// Every inbound branch must settle; at least one must fire.
    All,
    /// Discriminator: the first firing branch triggers the task.
    One,
    /// The first `n` firing branches trigger the task.
    Count(usize),
}

impl Join {
    /// Number of fired branches required, if fixed.
    pub fn threshold(&self) -> Option<usize> {
        match self {
            Join::All => None,
            Join::One => Some(1),
            Join::Count(n) => Some(*n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum JoinRepr {
    Count(usize),
    Word(String),
}

impl TryFrom<JoinRepr> for Join {
    type Error = String;

    fn try_from(repr: JoinRepr) -> Result<Self, Self::Error> {
        match repr {
            JoinRepr::Count(n) => Ok(Join::Count(n)),
            JoinRepr::Word(w) => match w.as_str() {
                "all" => Ok(Join::All),
                "one" => Ok(Join::One),
                other => other
                    .parse::<usize>()
                    .map(Join::Count)
                    .map_err(|_| format!("invalid join '{}', expected all, one or a number", other)),
            },
        }
    }
}

impl From<Join> for JoinRepr {
    fn from(join: Join) -> Self {
        match join {
            Join::All => JoinRepr::Word("all".to_string()),
            Join::One => JoinRepr::Word("one".to_string()),
            Join::Count(n) => JoinRepr::Count(n),
        }
    }
}

/// Retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySpec {
    /// Number of retries after the first failed attempt.
    pub count: u32,

    /// Seconds between attempts.
    #[serde(default)]
    pub delay: u64,

    /// Stop retrying when this evaluates to true.
    #[serde(default, alias = "break-on", skip_serializing_if = "Option::is_none")]
    pub break_on: Option<String>,
}

/// Fixed-count repetition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepeatSpec {
    /// Total number of iterations.
    #[serde(alias = "count")]
    pub iterations: u32,

    /// Seconds between iterations.
    #[serde(default)]
    pub delay: u64,

    /// Stop looping when this evaluates to true.
    #[serde(default, alias = "break-on", skip_serializing_if = "Option::is_none")]
    pub break_on: Option<String>,
}

/// Fan-out of one task over a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WithItemsSpec {
    /// Variable bound to the current element.
    #[serde(default = "default_item_var")]
    pub var: String,

    /// A literal list or an expression producing one.
    pub items: serde_json::Value,

    /// Maximum number of element actions in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

fn default_item_var() -> String {
    "item".to_string()
}
