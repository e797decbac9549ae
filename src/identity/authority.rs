//! Authority reply grammar.
//!
//! Default phrasing follows QuakeNet's Q:
//!
//! ```text
//! User luc2 is not authed.
//! -Information for user NotABot (using account NotABot):
//! Can't find user ghost.
//! WHOIS is only available to authed users.
//! ```

use fancy_regex::Regex;

use crate::common::error::ConfigError;
use crate::config::AuthorityConfig;

/// A recognized notice from the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityReply {
    NotAuthed { nick: String },
    Authed { nick: String, account: String },
    /// The authority does not track this participant any more.
    UnknownUser { nick: String },
    /// The bot itself is not authenticated and may not query.
    BotNotAuthed,
}

/// Compiled reply patterns and command formats for one network.
#[derive(Debug, Clone)]
pub struct AuthorityGrammar {
    not_authed: Regex,
    authed: Regex,
    unknown_user: Regex,
    bot_not_authed: Regex,
    query_format: String,
    auth_format: String,
}

impl AuthorityGrammar {
    pub fn from_config(config: &AuthorityConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            not_authed: compile(&config.not_authed_pattern)?,
            authed: compile(&config.authed_pattern)?,
            unknown_user: compile(&config.unknown_user_pattern)?,
            bot_not_authed: compile(&config.bot_not_authed_pattern)?,
            query_format: config.query_format.clone(),
            auth_format: config.auth_format.clone(),
        })
    }

    /// Recognize an authority notice.
    pub fn parse(&self, text: &str) -> Option<AuthorityReply> {
        if let Some(nick) = capture(&self.not_authed, text, "nick") {
            return Some(AuthorityReply::NotAuthed { nick });
        }
        if let (Some(nick), Some(account)) = (
            capture(&self.authed, text, "nick"),
            capture(&self.authed, text, "account"),
        ) {
            return Some(AuthorityReply::Authed { nick, account });
        }
        if let Some(nick) = capture(&self.unknown_user, text, "nick") {
            return Some(AuthorityReply::UnknownUser { nick });
        }
        if self.bot_not_authed.is_match(text).unwrap_or(false) {
            return Some(AuthorityReply::BotNotAuthed);
        }
        None
    }

    /// Line asking the authority about `nick`.
    pub fn query(&self, nick: &str) -> String {
        self.query_format.replace("{nick}", nick)
    }

    /// Line authenticating the bot itself.
    pub fn auth_line(&self, login: &str, password: &str) -> String {
        self.auth_format
            .replace("{login}", login)
            .replace("{password}", password)
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn capture(regex: &Regex, text: &str, group: &str) -> Option<String> {
    regex
        .captures(text)
        .ok()
        .flatten()
        .and_then(|c| c.name(group).map(|m| m.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> AuthorityGrammar {
        AuthorityGrammar::from_config(&AuthorityConfig::default()).unwrap()
    }

    #[test]
    fn test_not_authed() {
        assert_eq!(
            grammar().parse("User luc2 is not authed."),
            Some(AuthorityReply::NotAuthed {
                nick: "luc2".to_string()
            })
        );
    }

    #[test]
    fn test_authed() {
        assert_eq!(
            grammar().parse("-Information for user NotABot (using account NotABotQ):"),
            Some(AuthorityReply::Authed {
                nick: "NotABot".to_string(),
                account: "NotABotQ".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_user() {
        assert_eq!(
            grammar().parse("Can't find user ghost."),
            Some(AuthorityReply::UnknownUser {
                nick: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_bot_not_authed() {
        assert_eq!(
            grammar().parse("WHOIS is only available to authed users."),
            Some(AuthorityReply::BotNotAuthed)
        );
    }

    #[test]
    fn test_unrelated_notice() {
        assert_eq!(grammar().parse("-User flags: +ahilnwx"), None);
        assert_eq!(grammar().parse("End of list."), None);
    }

    #[test]
    fn test_formats() {
        let g = grammar();
        assert_eq!(g.query("carol"), "WHOIS carol");
        assert_eq!(g.auth_line("bot", "hunter2"), "AUTH bot hunter2");
    }

    #[test]
    fn test_custom_phrasing() {
        let mut config = AuthorityConfig::default();
        config.not_authed_pattern = r"^(?P<nick>\S+) is not registered".to_string();
        config.query_format = "INFO {nick}".to_string();
        let g = AuthorityGrammar::from_config(&config).unwrap();

        assert_eq!(
            g.parse("dave is not registered"),
            Some(AuthorityReply::NotAuthed {
                nick: "dave".to_string()
            })
        );
        assert_eq!(g.query("dave"), "INFO dave");
    }
}
