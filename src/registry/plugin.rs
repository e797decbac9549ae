//! Plugins bundle commands and triggers.

use std::sync::Arc;

use crate::registry::command::CommandHandler;
use crate::registry::trigger::TriggerHandler;

/// A set of commands and triggers loaded and unloaded together.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn commands(&self) -> Vec<Arc<dyn CommandHandler>> {
        Vec::new()
    }

    fn triggers(&self) -> Vec<Arc<dyn TriggerHandler>> {
        Vec::new()
    }
}
