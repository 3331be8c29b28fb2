use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to the debugged process or preparing a session.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// No response arrived within the configured request timeout.
    #[error("`{command}` request timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The target answered with `success: false`, or with a body we cannot use.
    #[error("`{command}` request failed: {message}")]
    Protocol { command: String, message: String },

    /// A frame header was unreadable (bad or missing Content-Length).
    #[error("bad message frame: {0}")]
    Frame(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("debugger connection closed")]
    Disconnected,
}

impl Error {
    /// Whether the connection can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout { .. } | Self::Disconnected => true,
            Self::Json(_) | Self::Protocol { .. } | Self::Frame(_) | Self::Config(_) => false,
        }
    }

    pub(crate) fn protocol(command: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.to_string(),
            message: message.into(),
        }
    }
}
