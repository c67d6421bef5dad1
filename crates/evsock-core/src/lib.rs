//! # evsock-core
//!
//! Event pub/sub on top of a raw socket transport.
//!
//! This crate provides the building blocks of an evsock server:
//!
//! - **Connection** - Per-socket event emitter with channel membership
//! - **Hub** - Connection and channel registries shared by one server
//! - **Pipeline** - Success and error middleware run on every payload
//! - **Auth** - Optional gate for the `authenticate` control event
//! - **Server** - Accept loop driving each connection on its own task
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Connection  │────▶│  Listeners  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │     Hub     │────▶│  Pipeline   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use evsock_core::{Connection, Server};
//! use evsock_transport::WebSocketTransport;
//!
//! let transport = WebSocketTransport::bind("127.0.0.1:8080".parse()?).await?;
//! let server = Server::builder()
//!     .on_connection(|conn: &Connection| {
//!         conn.on("chat", |conn, payload| {
//!             conn.broadcast("chat", payload.clone());
//!         });
//!     })
//!     .build(transport);
//! server.run().await?;
//! ```

pub mod auth;
pub mod channel;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod hub;
pub mod middleware;
pub mod registry;
pub mod server;

pub use auth::{Authenticator, Handshake};
pub use channel::{validate_channel_name, Channel, ChannelId, ChannelRegistry};
pub use connection::{Connection, ConnectionState};
pub use emitter::{Emitter, Event, Listener};
pub use error::{AuthError, EvsockError, MiddlewareError};
pub use hub::{Hub, HubBuilder, HubStats};
pub use middleware::{ErrorMiddleware, Middleware, Pipeline, PipelineFailure, StageResult};
pub use registry::ConnectionRegistry;
pub use server::{ConnectionHook, ErrorHook, HeadersHook, Server, ServerBuilder};
