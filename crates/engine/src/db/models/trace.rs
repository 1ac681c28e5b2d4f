//! Audit trace of state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of entity a transition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workflow,
    Task,
    Action,
}

/// One recorded state change. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub workflow_execution_id: Uuid,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<String>,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_info: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransitionRecord {
    /// Whether this record moved `name` from `from` to `to`.
    pub fn is(&self, name: &str, from: &str, to: &str) -> bool {
        self.name == name && self.previous_state.as_deref() == Some(from) && self.state == to
    }
}
