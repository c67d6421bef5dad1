//! Error types for evsock-core.

use evsock_protocol::{ControlEvent, ProtocolError};
use evsock_transport::{ConnectionId, TransportError};
use thiserror::Error;

/// Failure signalled by a middleware stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MiddlewareError {
    message: String,
}

impl MiddlewareError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for MiddlewareError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for MiddlewareError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Rejection returned by an auth gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthError {
    message: String,
}

impl AuthError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for AuthError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for AuthError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Connection-level errors.
///
/// None of these are fatal to the process: they are reported on the
/// connection's local `error` event.
#[derive(Debug, Error)]
pub enum EvsockError {
    /// Malformed text or binary envelope.
    #[error("Malformed envelope: {0}")]
    Parse(#[from] ProtocolError),

    /// Frame is neither text nor binary.
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// A middleware stage rejected the payload.
    #[error("Middleware error: {0}")]
    Middleware(#[from] MiddlewareError),

    /// The auth gate rejected the credentials.
    #[error("Unauthorized: {0}")]
    Auth(#[from] AuthError),

    /// Channel name failed validation.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// A control event arrived with a payload of the wrong shape.
    #[error("Invalid payload for {event}: {reason}")]
    ControlPayload { event: ControlEvent, reason: String },

    /// The requested identifier belongs to another live connection.
    #[error("Connection id already in use: {0}")]
    DuplicateId(ConnectionId),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),
}

impl From<TransportError> for EvsockError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::UnsupportedFrame(kind) => EvsockError::UnsupportedFrame(kind),
            TransportError::Protocol(e) => EvsockError::Parse(e),
            other => EvsockError::Transport(other),
        }
    }
}
