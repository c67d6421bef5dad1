//! Accept loop binding a transport to a hub.

use crate::auth::Authenticator;
use crate::connection::Connection;
use crate::error::EvsockError;
use crate::hub::{Hub, HubBuilder};
use crate::middleware::{ErrorMiddleware, Middleware};
use evsock_transport::{Accepted, Transport, TransportError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs for every accepted connection, before any inbound frame.
pub type ConnectionHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Runs for server-level failures (accept and handshake errors).
pub type ErrorHook = Arc<dyn Fn(&EvsockError) + Send + Sync>;

/// Runs with the handshake headers of every accepted connection.
pub type HeadersHook = Arc<dyn Fn(&Connection, &[(String, String)]) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    connection: Vec<ConnectionHook>,
    error: Vec<ErrorHook>,
    headers: Vec<HeadersHook>,
}

impl Hooks {
    fn report(&self, err: &EvsockError) {
        for hook in &self.error {
            hook(err);
        }
    }
}

/// Configures a [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    hub: HubBuilder,
    hooks: Hooks,
}

impl ServerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the auth gate.
    #[must_use]
    pub fn use_auth(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.hub = self.hub.auth(authenticator);
        self
    }

    /// Append a success stage to the pipeline.
    #[must_use]
    pub fn middleware(mut self, stage: impl Middleware + 'static) -> Self {
        self.hub = self.hub.middleware(stage);
        self
    }

    /// Append an error stage to the pipeline.
    #[must_use]
    pub fn error_middleware(mut self, stage: impl ErrorMiddleware + 'static) -> Self {
        self.hub = self.hub.error_middleware(stage);
        self
    }

    #[must_use]
    pub fn on_connection<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.hooks.connection.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&EvsockError) + Send + Sync + 'static,
    {
        self.hooks.error.push(Arc::new(hook));
        self
    }

    /// Observe the client's upgrade request headers.
    ///
    /// Runs once per connection after `sync` has been sent and before any
    /// `on_connection` hook. The hook sees request headers only; response
    /// headers are fixed by the transport.
    #[must_use]
    pub fn on_headers<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection, &[(String, String)]) + Send + Sync + 'static,
    {
        self.hooks.headers.push(Arc::new(hook));
        self
    }

    /// Freeze the configuration and bind it to `transport`.
    #[must_use]
    pub fn build(self, transport: impl Transport + 'static) -> Server {
        Server {
            transport: Box::new(transport),
            hub: self.hub.build(),
            hooks: Arc::new(self.hooks),
        }
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("hub", &self.hub)
            .field("connection_hooks", &self.hooks.connection.len())
            .field("error_hooks", &self.hooks.error.len())
            .field("headers_hooks", &self.hooks.headers.len())
            .finish()
    }
}

/// An event socket server.
///
/// Every accepted connection runs on its own task; its frames are handled
/// in arrival order.
pub struct Server {
    transport: Box<dyn Transport>,
    hub: Arc<Hub>,
    hooks: Arc<Hooks>,
}

impl Server {
    /// Start configuring a server.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Accept connections until the transport shuts down.
    ///
    /// # Errors
    ///
    /// Currently never fails; transient accept errors are reported through
    /// the error hooks.
    pub async fn run(self) -> Result<(), EvsockError> {
        self.accept_loop().await
    }

    /// Accept connections until `shutdown` resolves, then close every live
    /// connection.
    ///
    /// # Errors
    ///
    /// See [`Server::run`].
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), EvsockError> {
        let result = tokio::select! {
            result = self.accept_loop() => result,
            () = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        for connection in self.hub.connections().all() {
            if let Err(e) = connection.close() {
                debug!(connection = %connection.id(), error = %e, "Close on shutdown failed");
            }
        }
        result
    }

    async fn accept_loop(&self) -> Result<(), EvsockError> {
        info!(transport = self.transport.name(), "Accepting connections");

        loop {
            match self.transport.accept().await {
                Ok(accepted) => {
                    let hub = self.hub.clone();
                    let hooks = self.hooks.clone();
                    tokio::spawn(drive(hub, hooks, accepted));
                }
                Err(TransportError::ConnectionClosed) => {
                    info!(transport = self.transport.name(), "Transport closed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(transport = self.transport.name(), error = %e, "Accept failed");
                    self.hooks.report(&EvsockError::from(e));
                }
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("transport", &self.transport.name())
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

async fn drive(hub: Arc<Hub>, hooks: Arc<Hooks>, accepted: Accepted) {
    let Accepted {
        socket,
        mut inbound,
        headers,
    } = accepted;

    let connection = match Connection::accept(hub, socket) {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, "Failed to set up connection");
            hooks.report(&e);
            return;
        }
    };

    for hook in &hooks.headers {
        hook(&connection, &headers);
    }
    for hook in &hooks.connection {
        hook(&connection);
    }

    loop {
        match inbound.recv().await {
            Ok(Some(frame)) => connection.handle_frame(frame),
            Ok(None) => break,
            Err(e @ (TransportError::UnsupportedFrame(_) | TransportError::Protocol(_))) => {
                connection.handle_transport_error(e);
            }
            Err(e) => {
                connection.handle_transport_error(e);
                break;
            }
        }
    }

    connection.handle_close(&inbound.close_info().unwrap_or_default());
}
