//! Transport abstraction traits for evsock.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the event layer to be transport-agnostic.
//!
//! A transport hands out two halves per accepted connection: a shared
//! [`Socket`] used to write frames and query the ready state, and an owned
//! [`Inbound`] stream the server drains in delivery order.

use async_trait::async_trait;
use evsock_protocol::Frame;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::borrow::Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Socket ready state, numbered like the WebSocket `readyState` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Ready state shared between the halves of one connection.
#[derive(Debug, Clone)]
pub struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    #[must_use]
    pub fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    #[must_use]
    pub fn get(&self) -> ReadyState {
        ReadyState::from(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `Open` to `Closing`.
    ///
    /// Returns `false` if the socket was not open.
    pub fn begin_close(&self) -> bool {
        self.0
            .compare_exchange(
                ReadyState::Open as u8,
                ReadyState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

/// Close code and reason reported when a connection ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    /// Close code used when the peer sent no status.
    pub const NO_STATUS: u16 = 1005;

    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl Default for CloseInfo {
    fn default() -> Self {
        Self::new(Self::NO_STATUS, "")
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The peer sent a frame that is neither text nor binary.
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// The opening handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] evsock_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The writable half of a connection.
///
/// Sockets are shared: the owning connection writes its own frames, and other
/// connections write through it when multicasting.
pub trait Socket: Send + Sync {
    /// Queue a frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is not open or the frame cannot be queued.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Start closing the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the close request cannot be queued.
    fn close(&self) -> Result<(), TransportError>;

    /// Current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Check if the socket is open for writing.
    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The readable half of a connection.
#[async_trait]
pub trait Inbound: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` once the connection has closed.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Close code and reason, once known.
    fn close_info(&self) -> Option<CloseInfo> {
        None
    }
}

/// A freshly accepted connection.
pub struct Accepted {
    /// Writable half.
    pub socket: Arc<dyn Socket>,
    /// Readable half.
    pub inbound: Box<dyn Inbound>,
    /// Headers of the opening handshake request.
    pub headers: Vec<(String, String)>,
}

impl fmt::Debug for Accepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepted")
            .field("remote_addr", &self.socket.remote_addr())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Accepted, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}
