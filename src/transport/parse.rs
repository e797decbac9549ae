//! Protocol line parsing.

use crate::common::{is_channel, EventKind, LineEvent, Source};

/// A protocol line split into prefix, command and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub prefix: Option<String>,
    pub command: String,
    /// Parameters, the trailing one included.
    pub params: Vec<String>,
}

impl RawMessage {
    /// Parse one line. Message tags are skipped.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if rest.starts_with('@') {
            rest = rest.split_once(' ')?.1;
        }
        rest = rest.trim_start();

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, tail) = stripped.split_once(' ')?;
                rest = tail.trim_start();
                Some(prefix.to_string())
            }
            None => None,
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_string());
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Origin of the line, from its prefix.
    pub fn source(&self) -> Source {
        match self.prefix.as_deref() {
            Some(prefix) => match prefix.split_once('!') {
                Some((nick, host)) => Source::new(nick, Some(host.to_string())),
                None => Source::nick(prefix),
            },
            None => Source::nick(""),
        }
    }

    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Turn a parsed line into an event for the dispatcher.
///
/// Returns `None` for lines the bot core has no use for.
pub fn to_event(raw: &RawMessage) -> Option<LineEvent> {
    let source = raw.source();
    let (kind, target, arguments) = match raw.command.as_str() {
        "PRIVMSG" => {
            let target = raw.param(0);
            let kind = if is_channel(target) {
                EventKind::ChannelMessage
            } else {
                EventKind::PrivateMessage
            };
            (kind, target, vec![raw.param(1).to_string()])
        }
        "NOTICE" => (EventKind::Notice, raw.param(0), vec![raw.param(1).to_string()]),
        "JOIN" => (EventKind::Join, raw.param(0), Vec::new()),
        "PART" => (EventKind::Part, raw.param(0), raw.params.iter().skip(1).cloned().collect()),
        "NICK" => (EventKind::NickChange, raw.param(0), Vec::new()),
        "QUIT" => (EventKind::Quit, "", raw.params.clone()),
        "353" => (EventKind::NamesReply, raw.param(0), raw.params.iter().skip(1).cloned().collect()),
        "001" => (EventKind::Welcome, raw.param(0), raw.params.iter().skip(1).cloned().collect()),
        _ => return None,
    };
    if target.is_empty() && kind != EventKind::Quit {
        return None;
    }
    Some(LineEvent::new(kind, source, target, arguments))
}
