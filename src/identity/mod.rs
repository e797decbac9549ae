//! Identity resolution through the network's authority service.
//!
//! Display names can be spoofed; the authority maps them to durable
//! account names. Queries are asynchronous and shared: however many callers
//! ask about the same display name, one query is in flight at a time.
//!
//! - `authority`: the authority's reply grammar
//! - `resolver`: per display name state machine and waiter bookkeeping
//! - `commands`: the `auth` command

pub mod authority;
pub mod commands;
pub mod resolver;

pub use commands::IdentityPlugin;
pub use resolver::{Identity, IdentityResolver, ResolverHealth};
