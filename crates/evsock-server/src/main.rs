//! # evsock Server
//!
//! Event socket server: JSON and binary events, channels, token auth.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! evsock
//!
//! # Run with a specific config file
//! evsock --config /path/to/evsock.toml
//!
//! # Run with environment overrides
//! EVSOCK_PORT=8080 EVSOCK_HOST=0.0.0.0 EVSOCK_AUTH__TOKENS=alpha,beta evsock
//! ```

mod app;
mod config;
mod metrics;
mod status;

use anyhow::{Context, Result};
use evsock_transport::{WebSocketConfig, WebSocketTransport};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evsock=debug,evsock_core=debug,evsock_transport=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config::config_path(std::env::args().skip(1)) {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    info!("Starting evsock server on {}:{}", config.host, config.port);

    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let transport = WebSocketTransport::new(WebSocketConfig {
        bind_addr: config.bind_addr()?,
        max_message_size: config.transport.max_message_size,
    })
    .await
    .context("Failed to bind WebSocket transport")?;

    let server = app::build_server(&config, transport);

    if config.status.enabled {
        let addr = config.status_addr()?;
        let hub = server.hub().clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(addr, hub).await {
                error!("Status endpoint failed: {}", e);
            }
        });
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("evsock server stopped");
    Ok(())
}
