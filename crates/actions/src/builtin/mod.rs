//! Standard action provider.
//!
//! - `std.echo` - return the `output` parameter (sync)
//! - `std.noop` - do nothing (sync)
//! - `std.fail` - always fail, optionally with `error_data` (sync)
//! - `std.async_noop` - do nothing, completion is reported later (async)
//! - `std.sleep` - sleep for `seconds` (async)

mod echo;
mod fail;
mod noop;
mod sleep;

pub use self::echo::EchoAction;
pub use self::fail::FailAction;
pub use self::noop::{AsyncNoopAction, NoopAction};
pub use self::sleep::SleepAction;

use std::sync::Arc;

use crate::registry::{Action, ActionProvider, ActionRegistry};

/// Provider for the `std.*` actions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProvider;

impl ActionProvider for StdProvider {
    fn name(&self) -> &'static str {
        "std"
    }

    fn actions(&self) -> Vec<Arc<dyn Action>> {
        vec![
            Arc::new(EchoAction::new()),
            Arc::new(NoopAction::new()),
            Arc::new(FailAction::new()),
            Arc::new(AsyncNoopAction::new()),
            Arc::new(SleepAction::new()),
        ]
    }
}

/// Create an action registry with the standard provider registered.
pub fn create_default_registry() -> ActionRegistry {
    ActionRegistry::from_providers(&[&StdProvider])
}
