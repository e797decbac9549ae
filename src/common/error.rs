//! Error types for the application.

use thiserror::Error;

/// Configuration-related errors.
///
/// Any of these aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Command name or alias '{name}' is already registered")]
    DuplicateCommand { name: String },

    #[error("Trigger '{token}' is already registered")]
    DuplicateTrigger { token: String },

    #[error("Plugin '{name}' is already loaded")]
    DuplicatePlugin { name: String },

    #[error("Invalid trigger pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Outcome of a command or trigger handler that did not produce a reply.
///
/// Every variant except `Internal` is an expected failure and is answered
/// with a user-facing message. `Internal` carries true faults.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("bad options: {0}")]
    BadOptions(String),

    #[error("unsafe input: {0}")]
    Unsafe(String),

    #[error("timed out")]
    Timeout,

    #[error("not implemented")]
    NotImplemented,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    /// Shorthand for a bad-options failure.
    pub fn bad_options(message: impl Into<String>) -> Self {
        CommandError::BadOptions(message.into())
    }

    /// Whether this is an expected, user-caused failure.
    pub fn is_expected(&self) -> bool {
        !matches!(self, CommandError::Internal(_))
    }
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("Outbound line channel closed")]
    SinkClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for command handlers.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_is_not_expected() {
        let err = CommandError::from(anyhow::anyhow!("boom"));
        assert!(!err.is_expected());
        assert!(CommandError::Timeout.is_expected());
        assert!(CommandError::bad_options("missing city").is_expected());
    }

    #[test]
    fn test_duplicate_command_message() {
        let err = ConfigError::DuplicateCommand {
            name: "cmd".to_string(),
        };
        assert!(err.to_string().contains("'cmd'"));
    }
}
