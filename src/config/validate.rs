//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use fancy_regex::Regex;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Smallest payload a fragment may be cut down to.
const MIN_PAYLOAD: usize = 16;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Server
    if config.server.host.is_empty() {
        errors.push("server.host is required".to_string());
    }
    if config.server.port == 0 {
        errors.push("server.port must be non-zero".to_string());
    }
    if config.server.nick.is_empty() {
        errors.push("server.nick is required".to_string());
    }
    if config.server.reconnect_min_secs > config.server.reconnect_max_secs {
        errors.push("server.reconnect_min_secs must not exceed reconnect_max_secs".to_string());
    }

    // Command prefix
    let mut prefix = config.bot.command_prefix.chars();
    match (prefix.next(), prefix.next()) {
        (Some(c), None) if !c.is_whitespace() => {}
        _ => errors.push(format!(
            "bot.command_prefix must be a single non-whitespace character (got '{}')",
            config.bot.command_prefix
        )),
    }

    // Flood pacing
    if config.flood.max_payload < MIN_PAYLOAD {
        errors.push(format!(
            "flood.max_payload must be at least {} (got {})",
            MIN_PAYLOAD, config.flood.max_payload
        ));
    }
    if config.flood.byte_budget < config.flood.max_payload {
        errors.push(format!(
            "flood.byte_budget ({}) must be at least flood.max_payload ({})",
            config.flood.byte_budget, config.flood.max_payload
        ));
    }
    if config.flood.delay_ms == 0 {
        errors.push("flood.delay_ms must be non-zero".to_string());
    }

    // Invocation rate
    if config.rate_limit.max_commands == 0 {
        errors.push("rate_limit.max_commands must be non-zero".to_string());
    }

    // Authority
    let authority = &config.authority;
    if authority.enabled() {
        if authority.timeout_secs == 0 {
            errors.push("authority.timeout_secs must be non-zero".to_string());
        }
        if !authority.query_format.contains("{nick}") {
            errors.push("authority.query_format must contain {nick}".to_string());
        }
        let patterns = [
            ("not_authed_pattern", &authority.not_authed_pattern, false),
            ("authed_pattern", &authority.authed_pattern, true),
            ("unknown_user_pattern", &authority.unknown_user_pattern, false),
        ];
        for (field, pattern, needs_account) in patterns {
            match Regex::new(pattern) {
                Ok(_) => {
                    if !pattern.contains("(?P<nick>") {
                        errors.push(format!("authority.{} must capture a 'nick' group", field));
                    }
                    if needs_account && !pattern.contains("(?P<account>") {
                        errors.push(format!("authority.{} must capture an 'account' group", field));
                    }
                }
                Err(_) => errors.push(format!(
                    "authority.{} is not a valid regex: '{}'",
                    field, pattern
                )),
            }
        }
        if Regex::new(&authority.bot_not_authed_pattern).is_err() {
            errors.push(format!(
                "authority.bot_not_authed_pattern is not a valid regex: '{}'",
                authority.bot_not_authed_pattern
            ));
        }
    } else if authority.has_credentials() {
        errors.push("authority.account is required when credentials are configured".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
