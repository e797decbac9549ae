//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `NOTABOT_SERVER_HOST` - Network host
//! - `NOTABOT_SERVER_PORT` - Network port
//! - `NOTABOT_NICK` - Bot nick
//! - `NOTABOT_AUTH_LOGIN` - Login used with the authority
//! - `NOTABOT_AUTH_PASSWORD` - Password used with the authority
//! - `NOTABOT_ADMINS` - Comma separated admin accounts

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "NOTABOT";

/// Apply environment variable overrides to a config.
///
/// This allows credentials to be provided via environment variables
/// instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(host) = env::var(format!("{}_SERVER_HOST", ENV_PREFIX)) {
        config.server.host = host;
    }
    if let Ok(port) = env::var(format!("{}_SERVER_PORT", ENV_PREFIX)) {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }
    if let Ok(nick) = env::var(format!("{}_NICK", ENV_PREFIX)) {
        config.server.nick = nick;
    }

    // Authority credentials
    if let Ok(login) = env::var(format!("{}_AUTH_LOGIN", ENV_PREFIX)) {
        config.authority.login = login;
    }
    if let Ok(password) = env::var(format!("{}_AUTH_PASSWORD", ENV_PREFIX)) {
        config.authority.password = password;
    }

    if let Ok(admins) = env::var(format!("{}_ADMINS", ENV_PREFIX)) {
        config.bot.admins = parse_list(&admins);
    }

    config
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Get the config file path from environment or use default.
///
/// Checks `NOTABOT_CONFIG` environment variable, otherwise returns "notabot.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "notabot.conf".to_string())
}
