//! Thin network adapter feeding the dispatcher.
//!
//! ## Module Structure
//!
//! - `codec`: CRLF line framing with a Latin-1 fallback
//! - `parse`: protocol lines to [`LineEvent`](crate::common::LineEvent)s
//! - `connection`: registration, keepalive and reconnection

pub mod codec;
pub mod connection;
pub mod parse;

pub use connection::run;
