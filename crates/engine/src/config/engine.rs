//! Engine configuration.

use serde::Deserialize;
use std::time::Duration;

/// Which Store collaborator backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `TASKWEAVE_`:
/// - `TASKWEAVE_STORE`: `memory` or `postgres` (default: memory)
/// - `TASKWEAVE_STORE_RETRY_ATTEMPTS`: Transaction attempts on transient store errors (default: 3)
/// - `TASKWEAVE_STORE_RETRY_BACKOFF_MS`: Linear backoff step between attempts (default: 50)
/// - `TASKWEAVE_MAX_CONCURRENT_ACTIONS`: Local executor concurrency (default: 16)
/// - `TASKWEAVE_ACTION_TIMEOUT_SECS`: Default action timeout (optional)
/// - `TASKWEAVE_DRY_RUN`: Return sample results instead of running actions (default: false)
/// - `TASKWEAVE_LOG_JSON`: Emit JSON logs (default: false)
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Store backend
    #[serde(default)]
    pub store: StoreKind,

    /// Attempts per engine operation for transient store errors
    #[serde(default = "default_store_retry_attempts")]
    pub store_retry_attempts: u32,

    /// Backoff step in milliseconds; attempt `n` waits `n * step`
    #[serde(default = "default_store_retry_backoff_ms")]
    pub store_retry_backoff_ms: u64,

    /// Maximum number of actions running at once in the local executor
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,

    /// Timeout applied to actions whose task declares none
    #[serde(default)]
    pub action_timeout_secs: Option<u64>,

    /// Call `Action::test` instead of `Action::run`
    #[serde(default)]
    pub dry_run: bool,

    /// JSON log output
    #[serde(default)]
    pub log_json: bool,
}

fn default_store_retry_attempts() -> u32 {
    3
}

fn default_store_retry_backoff_ms() -> u64 {
    50
}

fn default_max_concurrent_actions() -> usize {
    16
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `TASKWEAVE_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("TASKWEAVE_").from_env::<EngineConfig>()
    }

    /// Backoff before retry attempt `attempt` (1-based).
    pub fn store_retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms.saturating_mul(attempt as u64))
    }

    /// Default action timeout.
    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            store_retry_attempts: default_store_retry_attempts(),
            store_retry_backoff_ms: default_store_retry_backoff_ms(),
            max_concurrent_actions: default_max_concurrent_actions(),
            action_timeout_secs: None,
            dry_run: false,
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.store_retry_attempts, 3);
        assert_eq!(config.max_concurrent_actions, 16);
        assert!(!config.dry_run);
        assert!(config.action_timeout().is_none());
    }

    #[test]
    fn test_store_retry_backoff_is_linear() {
        let config = EngineConfig::default();
        assert_eq!(config.store_retry_backoff(1), Duration::from_millis(50));
        assert_eq!(config.store_retry_backoff(3), Duration::from_millis(150));
    }
}
