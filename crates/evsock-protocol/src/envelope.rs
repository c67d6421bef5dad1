//! Envelope types for the evsock protocol.
//!
//! An envelope is the logical `{event, data}` unit. Text frames carry it as a
//! JSON object; binary frames carry the raw payload with an attached
//! `{event}` metadata string.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace prefix shared by every reserved control event.
pub const CONTROL_PREFIX: &str = "__evsock__::";

/// Event name used when a multicast recipient's pipeline rejects a payload.
pub const ERROR_EVENT: &str = "error";

/// Reserved control events.
///
/// These never reach user listener tables. The first five are requests a
/// client may send; the rest are acknowledgments the server sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlEvent {
    /// Identifier handshake. Sent on accept and echoed back by the client.
    Sync,
    /// Credential submission for the auth gate.
    Authenticate,
    /// Request to join a channel.
    JoinChannel,
    /// Request to leave the current channel.
    LeaveChannel,
    /// Request to broadcast to the sender's channel.
    Broadcast,
    /// Channel join acknowledgment.
    ChannelJoin,
    /// Channel leave acknowledgment.
    ChannelLeave,
    /// Auth gate accepted the credentials.
    Authenticated,
    /// Auth gate rejected the credentials.
    Unauthorized,
}

impl ControlEvent {
    /// All control events, in declaration order.
    pub const ALL: [ControlEvent; 9] = [
        ControlEvent::Sync,
        ControlEvent::Authenticate,
        ControlEvent::JoinChannel,
        ControlEvent::LeaveChannel,
        ControlEvent::Broadcast,
        ControlEvent::ChannelJoin,
        ControlEvent::ChannelLeave,
        ControlEvent::Authenticated,
        ControlEvent::Unauthorized,
    ];

    /// The name without the namespace prefix.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            ControlEvent::Sync => "sync",
            ControlEvent::Authenticate => "authenticate",
            ControlEvent::JoinChannel => "join-channel",
            ControlEvent::LeaveChannel => "leave-channel",
            ControlEvent::Broadcast => "broadcast",
            ControlEvent::ChannelJoin => "channeljoin",
            ControlEvent::ChannelLeave => "channelleave",
            ControlEvent::Authenticated => "authenticated",
            ControlEvent::Unauthorized => "unauthorized",
        }
    }

    /// The full wire name, e.g. `__evsock__::sync`.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            ControlEvent::Sync => "__evsock__::sync",
            ControlEvent::Authenticate => "__evsock__::authenticate",
            ControlEvent::JoinChannel => "__evsock__::join-channel",
            ControlEvent::LeaveChannel => "__evsock__::leave-channel",
            ControlEvent::Broadcast => "__evsock__::broadcast",
            ControlEvent::ChannelJoin => "__evsock__::channeljoin",
            ControlEvent::ChannelLeave => "__evsock__::channelleave",
            ControlEvent::Authenticated => "__evsock__::authenticated",
            ControlEvent::Unauthorized => "__evsock__::unauthorized",
        }
    }

    /// Parse a wire name into a control event.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        let short = name.strip_prefix(CONTROL_PREFIX)?;
        Self::ALL.into_iter().find(|ev| ev.short_name() == short)
    }

    /// Whether clients may send this event to the server.
    #[must_use]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            ControlEvent::Sync
                | ControlEvent::Authenticate
                | ControlEvent::JoinChannel
                | ControlEvent::LeaveChannel
                | ControlEvent::Broadcast
        )
    }
}

impl std::fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Whether an event name lives in the reserved control namespace.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(CONTROL_PREFIX)
}

/// Data carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured data from a text envelope.
    Json(Value),
    /// Raw bytes from a binary envelope.
    Binary(Bytes),
}

impl Payload {
    /// An empty JSON payload.
    #[must_use]
    pub fn null() -> Self {
        Payload::Json(Value::Null)
    }

    /// Borrow the JSON value, if any.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }

    /// Borrow the raw bytes, if any.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Json(_) => None,
            Payload::Binary(data) => Some(data),
        }
    }

    /// Borrow the payload as a string, if it is a JSON string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Envelope data.
    pub data: Payload,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<Payload>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// The control event this envelope addresses, if reserved.
    #[must_use]
    pub fn control(&self) -> Option<ControlEvent> {
        ControlEvent::from_wire(&self.event)
    }
}

/// JSON shape of a text envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Borrowed JSON shape used when encoding outbound text envelopes.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a, T: Serialize + ?Sized> {
    pub event: &'a str,
    pub data: &'a T,
}

/// Metadata attached to a binary frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryMeta {
    pub event: String,
}

/// Payload of the `sync` control event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    /// Connection identifier.
    pub id: String,
    /// Whether an auth gate is configured.
    #[serde(rename = "hasAuth", default)]
    pub has_auth: bool,
}

/// Payload of the `broadcast` control event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Event name to deliver to the channel.
    #[serde(rename = "evName")]
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload of `error` and `unauthorized` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

impl ErrorData {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
