//! Canonical message types flowing between the transport, the dispatcher
//! and the outbound sender.

use chrono::{DateTime, Utc};

/// Kind of an inbound line event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// PRIVMSG addressed to a channel.
    ChannelMessage,
    /// PRIVMSG addressed to the bot itself.
    PrivateMessage,
    /// NOTICE, either to a channel or to the bot.
    Notice,
    Join,
    Part,
    /// `target` carries the new display name.
    NickChange,
    Quit,
    /// `arguments` are `[visibility, channel, space separated names]`.
    NamesReply,
    /// Server registration completed (numeric 001).
    Welcome,
}

impl EventKind {
    /// Short name used in the traffic log.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChannelMessage => "pubmsg",
            EventKind::PrivateMessage => "privmsg",
            EventKind::Notice => "notice",
            EventKind::Join => "join",
            EventKind::Part => "part",
            EventKind::NickChange => "nick",
            EventKind::Quit => "quit",
            EventKind::NamesReply => "namreply",
            EventKind::Welcome => "welcome",
        }
    }
}

/// Origin of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Display name (nick), or the server name for server-originated lines.
    pub nick: String,
    /// `user@host` part of the prefix, when present.
    pub host: Option<String>,
}

impl Source {
    pub fn new(nick: impl Into<String>, host: Option<String>) -> Self {
        Self {
            nick: nick.into(),
            host,
        }
    }

    /// Source with only a display name.
    pub fn nick(nick: impl Into<String>) -> Self {
        Self::new(nick, None)
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}!{}", self.nick, host),
            None => write!(f, "{}", self.nick),
        }
    }
}

/// An immutable, already parsed inbound line.
#[derive(Debug, Clone)]
pub struct LineEvent {
    pub kind: EventKind,
    pub source: Source,
    pub target: String,
    pub arguments: Vec<String>,
    pub received_at: DateTime<Utc>,
}

impl LineEvent {
    pub fn new(kind: EventKind, source: Source, target: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            kind,
            source,
            target: target.into(),
            arguments,
            received_at: Utc::now(),
        }
    }

    /// Text payload of a message or notice (first argument).
    pub fn text(&self) -> &str {
        self.arguments.first().map(String::as_str).unwrap_or("")
    }

}

/// How a reply is delivered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Message,
    Notice,
}

/// A single line of reply text waiting in the outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub target: String,
    pub text: String,
    pub delivery: Delivery,
}

/// A length-bounded line handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundLine {
    pub target: String,
    pub text: String,
    pub delivery: Delivery,
}

impl OutboundLine {
    /// Render as a protocol line (without line terminator).
    pub fn to_wire(&self) -> String {
        let verb = match self.delivery {
            Delivery::Message => "PRIVMSG",
            Delivery::Notice => "NOTICE",
        };
        format!("{} {} :{}", verb, self.target, self.text)
    }
}

/// Fold a display name for case-insensitive lookups (ASCII casemapping).
pub fn fold_nick(nick: &str) -> String {
    nick.to_ascii_lowercase()
}

/// Whether a message target names a channel rather than a participant.
pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}
