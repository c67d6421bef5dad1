//! HTTP status endpoint.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use evsock_core::Hub;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub connections: usize,
    pub channels: usize,
}

/// Build the status router for `hub`.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/channels", get(channels_handler))
        .route("/stats", get(stats_handler))
        .with_state(hub)
}

/// Serve the status router on `addr` until the process exits.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn serve(addr: SocketAddr, hub: Arc<Hub>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Status endpoint listening on {}", addr);
    axum::serve(listener, router(hub)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Names of every non-empty channel.
async fn channels_handler(State(hub): State<Arc<Hub>>) -> Json<Vec<String>> {
    let mut names = hub.channel_names();
    names.sort();
    Json(names)
}

async fn stats_handler(State(hub): State<Arc<Hub>>) -> Json<StatsResponse> {
    let stats = hub.stats();
    Json(StatsResponse {
        connections: stats.connection_count,
        channels: stats.channel_count,
    })
}
