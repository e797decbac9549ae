//! Shared bot state handed to the dispatcher and to command handlers.
//!
//! - `handle`: `BotHandle`, the cloneable view of registry, outbound queue,
//!   identity resolver and shutdown switch
//! - `channels`: the channels wiring the transport to the dispatcher

pub mod channels;
pub mod handle;

pub use channels::ChannelBundle;
pub use handle::BotHandle;
