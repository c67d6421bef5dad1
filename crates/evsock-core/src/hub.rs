//! Shared context for a set of connections.
//!
//! A hub owns the connection registry, the channel registry, the middleware
//! pipeline and the optional auth gate. Independent hubs never see each
//! other's connections, so several servers can run in one process.

use crate::auth::Authenticator;
use crate::channel::ChannelRegistry;
use crate::middleware::{ErrorMiddleware, Middleware, Pipeline};
use crate::registry::ConnectionRegistry;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Shared state for every connection of one server.
pub struct Hub {
    connections: ConnectionRegistry,
    channels: ChannelRegistry,
    pipeline: Pipeline,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Hub {
    /// Start configuring a hub.
    #[must_use]
    pub fn builder() -> HubBuilder {
        HubBuilder::default()
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    /// Whether an auth gate is configured.
    #[must_use]
    pub fn has_auth(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Names of every non-empty channel.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.channel_names()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection_count: self.connections.len(),
            channel_count: self.channels.len(),
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.connections.len())
            .field("channels", &self.channels.len())
            .field("pipeline", &self.pipeline)
            .field("has_auth", &self.has_auth())
            .finish()
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of non-empty channels.
    pub channel_count: usize,
}

/// Collects middleware and the auth gate before any traffic flows.
///
/// The stage lists are frozen once [`HubBuilder::build`] returns.
#[derive(Default)]
pub struct HubBuilder {
    pipeline: Pipeline,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl HubBuilder {
    /// Install the auth gate, replacing any previous one.
    #[must_use]
    pub fn auth(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Append a success stage.
    #[must_use]
    pub fn middleware(mut self, stage: impl Middleware + 'static) -> Self {
        self.pipeline.push(stage);
        self
    }

    /// Append an error stage.
    #[must_use]
    pub fn error_middleware(mut self, stage: impl ErrorMiddleware + 'static) -> Self {
        self.pipeline.push_error(stage);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Hub> {
        info!(
            stages = self.pipeline.stage_count(),
            error_stages = self.pipeline.error_stage_count(),
            has_auth = self.authenticator.is_some(),
            "Creating hub"
        );
        Arc::new(Hub {
            connections: ConnectionRegistry::new(),
            channels: ChannelRegistry::new(),
            pipeline: self.pipeline,
            authenticator: self.authenticator,
        })
    }
}

impl fmt::Debug for HubBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubBuilder")
            .field("pipeline", &self.pipeline)
            .field("has_auth", &self.authenticator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::{AuthError, MiddlewareError};
    use crate::middleware::StageResult;
    use evsock_protocol::Payload;
    use evsock_transport::memory;

    #[test]
    fn test_builder_configures_pipeline_and_auth() {
        let hub = Hub::builder()
            .auth(|_: &Connection, _: &Payload| -> Result<(), AuthError> { Ok(()) })
            .middleware(|_: &Connection, _: &mut Payload| -> StageResult { Ok(()) })
            .error_middleware(
                |_: &MiddlewareError, _: &Connection, _: &mut Payload| -> StageResult { Ok(()) },
            )
            .build();

        assert!(hub.has_auth());
        assert_eq!(hub.pipeline().stage_count(), 1);
        assert_eq!(hub.pipeline().error_stage_count(), 1);
    }

    #[test]
    fn test_independent_hubs() {
        let first = Hub::builder().build();
        let second = Hub::builder().build();

        let (socket, _inbound, _peer) = memory::socket_pair();
        let conn = Connection::accept(first.clone(), socket).unwrap();
        conn.join("room").unwrap();

        assert_eq!(
            first.stats(),
            HubStats {
                connection_count: 1,
                channel_count: 1
            }
        );
        assert_eq!(second.stats().connection_count, 0);
        assert!(second.channel_names().is_empty());
    }
}
