//! Plugins shipped with the bot.

pub mod builtin;

pub use builtin::CorePlugin;
