//! # evsock-transport
//!
//! Transport abstraction layer for the evsock event socket layer.
//!
//! This crate provides a unified interface over the raw socket:
//!
//! - **WebSocket** - tokio-tungstenite listener
//! - **Memory** - in-process channel pairs, mainly for tests
//!
//! ## Transport Abstraction
//!
//! Every transport hands out an [`Accepted`] connection made of a shared
//! [`Socket`] (send, close, ready state) and an [`Inbound`] frame stream.
//!
//! ```rust,ignore
//! use evsock_transport::{Transport, Inbound};
//!
//! async fn drain(transport: impl Transport) {
//!     let mut accepted = transport.accept().await.unwrap();
//!     while let Ok(Some(frame)) = accepted.inbound.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{
    Accepted, CloseInfo, ConnectionId, Inbound, ReadyState, SharedReadyState, Socket, Transport,
    TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
