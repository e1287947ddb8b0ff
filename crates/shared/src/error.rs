//! Error taxonomy shared by every layer of the notification client.

use thiserror::Error;

/// Everything that can go wrong between the socket and the toast stack.
///
/// None of these variants is fatal to the hosting process. `Auth` ends the current
/// connection attempt, `Transport` sends the session into reconnect, `Protocol` drops a
/// single frame and `DispatchTimeout` detaches one consumer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    /// Missing, expired or rejected credential.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Socket-level failure (open, read, write or peer close).
    #[error("transport error: {0}")]
    Transport(String),
    /// Malformed frame or body.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A consumer did not finish within its bound and was detached.
    #[error("consumer '{consumer}' did not finish within {timeout_ms}ms")]
    DispatchTimeout { consumer: String, timeout_ms: u64 },
    /// Invalid startup configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NotifyError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, NotifyError::Auth(_))
    }
}

pub type NotifyResult<T> = Result<T, NotifyError>;
