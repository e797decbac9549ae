//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub flood: FloodConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
}

/// Network connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub nick: String,
    #[serde(default = "default_realname")]
    pub realname: String,
    /// Channels joined after registration.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_leave_message")]
    pub leave_message: String,
    #[serde(default = "default_reconnect_min")]
    pub reconnect_min_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

/// Command handling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub command_prefix: String,
    /// Resolved account names allowed to run admin commands.
    pub admins: Vec<String>,
    /// Answer rate-denied invocations with `rate_denied_notice`.
    pub answer_rate_denied: bool,
    pub rate_denied_notice: String,
    /// Run every matching trigger instead of only the first one.
    pub multi_trigger: bool,
    /// Overrides the generated "ask an admin" message.
    pub admin_denied_message: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            admins: Vec::new(),
            answer_rate_denied: false,
            rate_denied_notice: "Nop.".to_string(),
            multi_trigger: false,
            admin_denied_message: None,
        }
    }
}

impl BotConfig {
    /// The prefix as a single character.
    pub fn prefix_char(&self) -> char {
        self.command_prefix.chars().next().unwrap_or('!')
    }

    /// Reply sent to non-admins trying an admin command.
    pub fn admin_denied(&self) -> String {
        if let Some(ref message) = self.admin_denied_message {
            return message.clone();
        }
        if self.admins.is_empty() {
            "Sorry, you need to be admin to issue this command.".to_string()
        } else {
            format!(
                "Sorry, you can't do that by yourself, ask {}",
                self.admins.join(" or ")
            )
        }
    }
}

/// Outbound flood pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Longest text sent in one protocol line, in bytes.
    pub max_payload: usize,
    /// Bytes allowed within the flood horizon.
    pub byte_budget: usize,
    pub horizon_secs: u64,
    /// Pause between two pressure checks.
    pub delay_ms: u64,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            max_payload: 450,
            byte_budget: 450,
            horizon_secs: 4,
            delay_ms: 1000,
        }
    }
}

impl FloodConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Per-invoker command rate policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Invocations allowed per window; the next one is denied.
    pub max_commands: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_commands: 2,
            window_secs: 4,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// The network service answering identity queries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Nick of the authority; empty disables identity resolution.
    pub account: String,
    pub login: String,
    pub password: String,
    pub timeout_secs: u64,
    /// Consecutive timeouts before the resolver is flagged unhealthy.
    pub unhealthy_after: u32,
    /// Query participants as soon as they join.
    pub check_on_join: bool,
    /// `{nick}` is replaced by the queried display name.
    pub query_format: String,
    /// `{login}` and `{password}` are replaced by the credentials.
    pub auth_format: String,
    pub not_authed_pattern: String,
    pub authed_pattern: String,
    pub unknown_user_pattern: String,
    pub bot_not_authed_pattern: String,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            login: String::new(),
            password: String::new(),
            timeout_secs: 5,
            unhealthy_after: 3,
            check_on_join: true,
            query_format: "WHOIS {nick}".to_string(),
            auth_format: "AUTH {login} {password}".to_string(),
            not_authed_pattern: r"^User (?P<nick>[^ ]+) is not authed\.".to_string(),
            authed_pattern: r"^-Information for user (?P<nick>[^ ]+) \(using account (?P<account>[^ ]+)\)"
                .to_string(),
            unknown_user_pattern: r"^Can't find user (?P<nick>[^ ]+)\.".to_string(),
            bot_not_authed_pattern: r"^WHOIS is only available to authed users\.".to_string(),
        }
    }
}

impl AuthorityConfig {
    pub fn enabled(&self) -> bool {
        !self.account.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_credentials(&self) -> bool {
        !self.login.is_empty() && !self.password.is_empty()
    }
}

fn default_port() -> u16 {
    6667
}

fn default_realname() -> String {
    "notabot".to_string()
}

fn default_leave_message() -> String {
    "Bye.".to_string()
}

fn default_reconnect_min() -> u64 {
    5
}

fn default_reconnect_max() -> u64 {
    300
}

impl Config {
    /// Minimal configuration used by tests and as a base for overrides.
    pub fn with_server(host: &str, nick: &str) -> Self {
        Self {
            server: ServerConfig {
                host: host.to_string(),
                port: default_port(),
                nick: nick.to_string(),
                realname: default_realname(),
                channels: Vec::new(),
                leave_message: default_leave_message(),
                reconnect_min_secs: default_reconnect_min(),
                reconnect_max_secs: default_reconnect_max(),
            },
            bot: BotConfig::default(),
            flood: FloodConfig::default(),
            rate_limit: RateLimitConfig::default(),
            authority: AuthorityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_denied_lists_admins() {
        let mut bot = BotConfig::default();
        bot.admins = vec!["luc".to_string(), "max".to_string()];
        assert_eq!(
            bot.admin_denied(),
            "Sorry, you can't do that by yourself, ask luc or max"
        );
    }

    #[test]
    fn test_admin_denied_override() {
        let mut bot = BotConfig::default();
        bot.admin_denied_message = Some("No.".to_string());
        assert_eq!(bot.admin_denied(), "No.");
    }

    #[test]
    fn test_authority_disabled_by_default() {
        let authority = AuthorityConfig::default();
        assert!(!authority.enabled());
        assert_eq!(authority.timeout(), Duration::from_secs(5));
    }
}
