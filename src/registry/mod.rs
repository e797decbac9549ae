//! Command and trigger registry.
//!
//! ## Module Structure
//!
//! - `command`: the command contract (`Command`) and its type-erased form
//! - `trigger`: the pattern trigger contract (`Trigger`)
//! - `plugin`: plugins aggregate commands and triggers
//! - `table`: the `Registry` itself, built once at startup

pub mod command;
pub mod plugin;
pub mod table;
pub mod trigger;

pub use command::{
    Command, CommandContext, CommandDescriptor, CommandHandler, Invocation, PreparedCommand,
    ReplyTarget,
};
pub use plugin::Plugin;
pub use table::{Registry, SharedRegistry};
pub use trigger::{TriggerHandler, TriggerMatch};

use std::sync::Arc;

/// Whether two handles point at the same handler value.
pub(crate) fn same_handler<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
