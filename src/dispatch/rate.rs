//! Per-invoker command rate policy.
//!
//! Keeps a single user from getting the bot kicked for excess flood by
//! issuing commands in rapid succession. Independent of the outbound
//! sender's own pacing.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::common::fold_nick;
use crate::config::RateLimitConfig;

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { count: u32 },
    Denied { count: u32 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct RateCounter {
    count: u32,
    window_start: Instant,
}

/// Counters keyed by folded display name; each entry is locked on its own.
#[derive(Debug)]
pub struct InvocationRate {
    counters: DashMap<String, RateCounter>,
    max_commands: u32,
    window: Duration,
}

impl InvocationRate {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            counters: DashMap::new(),
            max_commands: config.max_commands,
            window: config.window(),
        }
    }

    /// Count a command attempt by `invoker` now.
    pub fn check(&self, invoker: &str) -> RateDecision {
        self.check_at(invoker, Instant::now())
    }

    /// Count a command attempt by `invoker` at `now`.
    pub fn check_at(&self, invoker: &str, now: Instant) -> RateDecision {
        let mut counter = self
            .counters
            .entry(fold_nick(invoker))
            .or_insert(RateCounter {
                count: 0,
                window_start: now,
            });

        if now.duration_since(counter.window_start) <= self.window {
            counter.count = counter.count.saturating_add(1);
            if counter.count > self.max_commands {
                debug!("{} is over the command rate ({} in window)", invoker, counter.count);
                return RateDecision::Denied {
                    count: counter.count,
                };
            }
        } else {
            *counter = RateCounter {
                count: 1,
                window_start: now,
            };
        }

        RateDecision::Allowed {
            count: counter.count,
        }
    }

    /// Drop the counter of a participant who left.
    pub fn forget(&self, invoker: &str) {
        self.counters.remove(&fold_nick(invoker));
    }

    /// Drop every counter, as when a new session starts.
    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Drop counters whose window has elapsed; the next command would
    /// restart them at one anyway.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| now.duration_since(counter.window_start) <= self.window);
        before.saturating_sub(self.counters.len())
    }

    /// Carry the counter over a nick change so renaming does not reset it.
    pub fn rename(&self, old: &str, new: &str) {
        if let Some((_, counter)) = self.counters.remove(&fold_nick(old)) {
            self.counters.insert(fold_nick(new), counter);
        }
    }
}
