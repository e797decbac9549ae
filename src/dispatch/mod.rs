//! Inbound event dispatch.
//!
//! - `dispatcher`: classifies events and runs commands and triggers
//! - `options`: command argument splitting
//! - `rate`: per-invoker command rate policy

pub mod dispatcher;
pub mod options;
pub mod rate;

pub use dispatcher::Dispatcher;
