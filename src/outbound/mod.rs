//! Outbound reply path.
//!
//! - `queue`: the per-connection FIFO every component enqueues replies into
//! - `sender`: the single consumer that splits long lines and paces sends
//!   so the connection is never penalized for flooding

pub mod queue;
pub mod sender;

pub use queue::{OutboundQueue, OutboundReceiver};
pub use sender::{ChannelSink, Sender};
