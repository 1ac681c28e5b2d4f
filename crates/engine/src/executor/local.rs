//! In-process executor.
//!
//! Runs actions on the tokio runtime, bounded by a semaphore, and sends
//! each completion back over a channel.

use std::sync::Arc;

use async_trait::async_trait;
use taskweave_actions::ActionRegistry;
use tokio::sync::{mpsc, Semaphore};

use crate::config::EngineConfig;
use crate::result_ext::ResultExt;

use super::{run_action, ActionCompletion, ActionRequest, Executor};

/// Executor backed by the local action registry.
pub struct LocalExecutor {
    registry: Arc<ActionRegistry>,
    semaphore: Arc<Semaphore>,
    completions: mpsc::UnboundedSender<ActionCompletion>,
    default_timeout: Option<u64>,
    dry_run: bool,
}

impl LocalExecutor {
    /// Create an executor and the receiver its completions arrive on.
    pub fn new(
        registry: Arc<ActionRegistry>,
        config: &EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ActionCompletion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = Self {
            registry,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_actions.max(1))),
            completions: tx,
            default_timeout: config.action_timeout_secs,
            dry_run: config.dry_run,
        };
        (executor, rx)
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn dispatch(&self, mut request: ActionRequest) -> bool {
        if !self.registry.has(&request.action_name) {
            tracing::warn!(action = %request.action_name, "Rejecting unknown action");
            return false;
        }
        if self.completions.is_closed() {
            tracing::warn!(
                action_execution_id = %request.action_execution_id,
                "Completion channel closed, rejecting action"
            );
            return false;
        }
        request.timeout = request.timeout.or(self.default_timeout);

        let registry = self.registry.clone();
        let semaphore = self.semaphore.clone();
        let completions = self.completions.clone();
        let dry_run = self.dry_run;

        tokio::spawn(async move {
            // Keep permit until done
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            tracing::debug!(
                action_execution_id = %request.action_execution_id,
                action = %request.action_name,
                task = %request.task_name,
                "Running action"
            );
            let completion = run_action(&registry, &request, dry_run).await;
            let _ = completions.send(completion).log_warn(format!(
                "completion of {} dropped, receiver closed",
                request.action_execution_id
            ));
        });
        true
    }
}
