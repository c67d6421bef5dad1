//! Server wiring: auth gate, middleware and connection hooks.

use crate::config::Config;
use crate::metrics;
use evsock_core::{
    AuthError, Connection, Event, MiddlewareError, Server, ServerBuilder, StageResult,
};
use evsock_protocol::Payload;
use evsock_transport::Transport;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Build the server for `config` on top of `transport`.
pub fn build_server(config: &Config, transport: impl Transport + 'static) -> Server {
    configure(config).build(transport)
}

fn configure(config: &Config) -> ServerBuilder {
    let mut builder = Server::builder()
        .middleware(count_messages)
        .error_middleware(log_rejection)
        .on_headers(|conn, headers| {
            debug!(connection = %conn.id(), headers = headers.len(), "Handshake headers");
        })
        .on_connection(register_connection)
        .on_error(|err| {
            warn!(error = %err, "Server error");
            metrics::record_error("server");
        });

    if !config.auth.tokens.is_empty() {
        info!(tokens = config.auth.tokens.len(), "Token authentication enabled");
        builder = builder.use_auth(token_gate(&config.auth.tokens));
    }

    builder
}

/// Accept credentials equal to one of `tokens`.
fn token_gate(
    tokens: &[String],
) -> impl Fn(&Connection, &Payload) -> Result<(), AuthError> + Send + Sync {
    let tokens: HashSet<String> = tokens.iter().cloned().collect();
    move |_: &Connection, credentials: &Payload| -> Result<(), AuthError> {
        match credentials.as_str() {
            Some(token) if tokens.contains(token) => Ok(()),
            Some(_) => Err(AuthError::new("Invalid token")),
            None => Err(AuthError::new("Expected a string token")),
        }
    }
}

fn count_messages(_: &Connection, payload: &mut Payload) -> StageResult {
    metrics::record_message(if payload.is_binary() { "binary" } else { "json" });
    Ok(())
}

fn log_rejection(error: &MiddlewareError, conn: &Connection, _: &mut Payload) -> StageResult {
    warn!(connection = %conn.id(), error = %error, "Payload rejected by middleware");
    metrics::record_error("middleware");
    Ok(())
}

fn register_connection(conn: &Connection) {
    metrics::record_connection();

    conn.on(Event::Close, |conn, _| {
        metrics::record_disconnection();
        metrics::set_active_channels(conn.hub().stats().channel_count);
    });
    conn.on(Event::ChannelJoin, |conn, _| {
        metrics::set_active_channels(conn.hub().stats().channel_count);
    });
    conn.on(Event::ChannelLeave, |conn, _| {
        metrics::set_active_channels(conn.hub().stats().channel_count);
    });
    conn.on(Event::Authenticated, |_, _| metrics::record_auth("accepted"));
    conn.on(Event::Unauthorized, |_, _| metrics::record_auth("rejected"));
    conn.on(Event::Error, |_, _| metrics::record_error("connection"));

    conn.on("ping", |conn, payload| {
        if let Err(e) = conn.send_payload("pong", payload) {
            debug!(connection = %conn.id(), error = %e, "Failed to answer ping");
        }
    });
}
