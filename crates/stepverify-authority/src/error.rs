use std::time::Duration;

use thiserror::Error;

use crate::receipt::EventKind;

/// Failures talking to an authority.
///
/// An authority *refusing* a call is not an error: it comes back as a
/// [`crate::Receipt`] with a reverted status. These variants are for calls
/// that could not be completed or whose answer could not be understood.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("JSON-RPC error (code {code}): {message}")]
    JsonRpc { code: i64, message: String },

    #[error("Expected {0} event not found in receipt")]
    EventNotFound(EventKind),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Failed to decode authority response: {0}")]
    Decode(String),

    #[error("Unknown instance {0}")]
    UnknownInstance(String),

    #[error("Unknown snapshot {0}")]
    UnknownSnapshot(String),

    #[error("Address resolution failed: {0}")]
    Resolver(String),
}

impl AuthorityError {
    /// Whether the call never completed (connection failure or timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, AuthorityError::Transport(_) | AuthorityError::Timeout { .. })
    }
}

impl From<reqwest::Error> for AuthorityError {
    fn from(err: reqwest::Error) -> Self {
        AuthorityError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthorityError>;
