//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to the streaming engine.
//! It provides the router construction and server startup functionality.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::engine::StreamingEngine;
use crate::state::Config;

pub mod connection;
pub mod http;

pub use connection::ChannelConnection;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// The broadcast engine listeners attach to.
    pub engine: Arc<StreamingEngine>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    pub fn new(engine: Arc<StreamingEngine>, config: Arc<RwLock<Config>>) -> Self {
        Self { engine, config }
    }
}

/// Port range probed when no port is configured.
const FALLBACK_PORT_RANGE: (u16, u16) = (49400, 49410);

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the configured port, or the first free fallback port if it is 0.
pub async fn bind(preferred_port: u16) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        Ok((preferred_port, tokio::net::TcpListener::bind(&addr).await?))
    } else {
        find_available_port(FALLBACK_PORT_RANGE.0, FALLBACK_PORT_RANGE.1).await
    }
}

/// Serves HTTP until `shutdown` resolves.
///
/// Listener sessions are ended through the engine before the server stops
/// accepting, so open streaming bodies finish and graceful shutdown does not
/// wait on them.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let preferred_port = state.config.read().preferred_port;
    let (port, listener) = bind(preferred_port).await?;

    log::info!("[Server] Listening on http://0.0.0.0:{}", port);
    let engine = Arc::clone(&state.engine);
    let app = http::create_router(state);

    // Use into_make_service_with_connect_info to enable ConnectInfo<SocketAddr> extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        engine.shutdown();
    })
    .await?;

    log::info!("[Server] Stopped");
    Ok(())
}
