//! # evsock-protocol
//!
//! Wire definitions for the evsock event socket layer.
//!
//! This crate defines how `{event, data}` envelopes travel over a socket:
//! JSON text frames, binary frames with attached metadata, and the reserved
//! control event namespace.
//!
//! ## Control Events
//!
//! - `sync` - Identifier handshake
//! - `authenticate` / `authenticated` / `unauthorized` - Auth gate
//! - `join-channel` / `leave-channel` / `channeljoin` / `channelleave` - Channel membership
//! - `broadcast` - Relay to the sender's channel
//!
//! ## Example
//!
//! ```rust
//! use evsock_protocol::{codec, Payload};
//!
//! let frame = codec::encode_binary("frame", &[1, 2, 3]).unwrap();
//! let envelope = codec::decode(&frame).unwrap();
//!
//! assert_eq!(envelope.event, "frame");
//! assert_eq!(envelope.data, Payload::from(vec![1u8, 2, 3]));
//! ```

pub mod codec;
pub mod envelope;
pub mod frames;

pub use codec::{decode, encode_binary, encode_payload, encode_text, ProtocolError};
pub use envelope::{
    is_reserved, BroadcastRequest, ControlEvent, Envelope, ErrorData, Payload, SyncData,
    CONTROL_PREFIX, ERROR_EVENT,
};
pub use frames::{Frame, FrameKind};
