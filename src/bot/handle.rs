//! Cloneable handle on the running bot.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::common::{is_channel, Delivery, EventKind, LineEvent};
use crate::config::BotConfig;
use crate::identity::{Identity, IdentityResolver};
use crate::outbound::OutboundQueue;
use crate::registry::{ReplyTarget, SharedRegistry};

/// Everything handlers and the dispatcher share.
#[derive(Clone)]
pub struct BotHandle {
    pub registry: SharedRegistry,
    pub outbound: OutboundQueue,
    pub identity: IdentityResolver,
    pub config: Arc<BotConfig>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl BotHandle {
    pub fn new(
        registry: SharedRegistry,
        outbound: OutboundQueue,
        identity: IdentityResolver,
        config: BotConfig,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            registry,
            outbound,
            identity,
            config: Arc::new(config),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn prefix(&self) -> char {
        self.config.prefix_char()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Whether a resolved identity is on the admin list.
    ///
    /// Only the account counts, never the display name.
    pub fn is_admin(&self, identity: &Identity) -> bool {
        identity.account.as_deref().is_some_and(|account| {
            self.config
                .admins
                .iter()
                .any(|admin| admin.eq_ignore_ascii_case(account))
        })
    }

    /// Queue a reply to `event` following the reply policy.
    ///
    /// A notice is only ever answered with notices.
    pub fn reply(&self, event: &LineEvent, policy: ReplyTarget, text: &str) -> usize {
        let invoker = event.source.nick.as_str();
        let delivery = match event.kind {
            EventKind::Notice => Delivery::Notice,
            _ => Delivery::Message,
        };
        match policy {
            ReplyTarget::Invoker => self.outbound.enqueue_notice(invoker, text),
            ReplyTarget::Channel if is_private(event) => self.outbound.enqueue_as(invoker, text, delivery),
            ReplyTarget::Channel => self.outbound.enqueue_as(&event.target, text, delivery),
        }
    }

    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Whether the event was addressed to the bot rather than a channel.
fn is_private(event: &LineEvent) -> bool {
    match event.kind {
        EventKind::PrivateMessage => true,
        EventKind::Notice => !is_channel(&event.target),
        _ => false,
    }
}
