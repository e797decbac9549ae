//! Pattern trigger contract.
//!
//! Triggers react to traffic that is not addressed to the bot: every
//! message not starting with the command prefix is matched against the
//! registered patterns.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use fancy_regex::Regex;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::common::error::CommandResult;
use crate::registry::command::CommandContext;

/// Capture groups of a successful trigger match.
#[derive(Debug, Clone, Default)]
pub struct TriggerMatch {
    pub text: String,
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl TriggerMatch {
    /// Match `regex` against `text`, returning `None` on a miss or a regex error.
    pub fn find(regex: &Regex, text: &str) -> Option<Self> {
        let captures = match regex.captures(text) {
            Ok(Some(captures)) => captures,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Trigger regex '{}' failed on input: {}", regex.as_str(), e);
                return None;
            }
        };

        let groups = (0..captures.len())
            .map(|i| captures.get(i).map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        Some(Self {
            text: text.to_string(),
            groups,
            named,
        })
    }

    /// Group by index; 0 is the whole match.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Named group.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// A passive reaction provided by a plugin.
pub trait Trigger: Send + Sync + 'static {
    /// Registry key, unique among triggers. Distinct from the pattern so two
    /// triggers may share similar patterns.
    fn token(&self) -> &str;

    fn pattern(&self) -> &str;

    /// Display name to resolve before responding.
    fn subject(&self, _matched: &TriggerMatch) -> Option<String> {
        None
    }

    /// Produce the reply text. An empty reply sends nothing.
    fn respond(
        &self,
        matched: TriggerMatch,
        ctx: CommandContext,
    ) -> impl Future<Output = CommandResult<String>> + Send;
}

/// Type-erased trigger as stored in the registry.
pub trait TriggerHandler: Send + Sync {
    fn token(&self) -> &str;
    fn pattern(&self) -> &str;
    fn subject(&self, matched: &TriggerMatch) -> Option<String>;
    fn fire(self: Arc<Self>, matched: TriggerMatch, ctx: CommandContext) -> BoxFuture<'static, CommandResult<String>>;
}

impl<T: Trigger> TriggerHandler for T {
    fn token(&self) -> &str {
        Trigger::token(self)
    }

    fn pattern(&self) -> &str {
        Trigger::pattern(self)
    }

    fn subject(&self, matched: &TriggerMatch) -> Option<String> {
        Trigger::subject(self, matched)
    }

    fn fire(self: Arc<Self>, matched: TriggerMatch, ctx: CommandContext) -> BoxFuture<'static, CommandResult<String>> {
        async move { self.respond(matched, ctx).await }.boxed()
    }
}

/// A registered trigger with its compiled pattern.
#[derive(Clone)]
pub struct TriggerDescriptor {
    pub token: String,
    pub regex: Regex,
    pub handler: Arc<dyn TriggerHandler>,
}

impl std::fmt::Debug for TriggerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDescriptor")
            .field("token", &self.token)
            .field("pattern", &self.regex.as_str())
            .finish()
    }
}
