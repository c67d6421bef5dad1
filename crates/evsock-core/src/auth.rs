//! Authentication gate.
//!
//! The gate only reacts to the `authenticate` control event. It does not hold
//! back any other traffic, and a connection that never authenticates stays
//! open.

use crate::connection::Connection;
use crate::error::AuthError;
use evsock_protocol::Payload;

/// Validates the credentials a client submits with `authenticate`.
pub trait Authenticator: Send + Sync {
    /// # Errors
    ///
    /// Returns an [`AuthError`] to reject the connection.
    fn authenticate(&self, connection: &Connection, credentials: &Payload) -> Result<(), AuthError>;
}

impl<F> Authenticator for F
where
    F: Fn(&Connection, &Payload) -> Result<(), AuthError> + Send + Sync,
{
    fn authenticate(&self, connection: &Connection, credentials: &Payload) -> Result<(), AuthError> {
        self(connection, credentials)
    }
}

/// Handshake progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handshake {
    /// No credentials submitted yet.
    #[default]
    Pending,
    /// The gate is evaluating the credentials.
    Verifying,
    /// The gate accepted the credentials.
    Authenticated,
    /// The gate rejected the credentials.
    Rejected,
}
