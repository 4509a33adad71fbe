//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the streaming engine.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{connect_info::ConnectInfo, State},
    http::{header, HeaderMap, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::api::connection::ChannelConnection;
use crate::api::AppState;
use crate::engine::is_stream_request;
use crate::error::{TidecastError, TidecastResult};
use crate::protocol_constants::{
    server_header, CORS_ALLOW_METHODS, ICY_METAINT, ICY_REQUEST_HEADER, SERVICE_ID,
    STREAM_CONTENT_TYPE, STREAM_EXPIRES,
};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router.
///
/// The stream is served on any path ending in `/stream.mp3`, so it is routed
/// through the fallback rather than a fixed route.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .fallback(get(stream_audio))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe with engine counters.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.engine.stats();
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "sessions": stats.sessions,
        "icyListeners": stats.icy_listeners,
        "notSupported": stats.not_supported,
    }))
}

/// Returns `true` if the client sent `Icy-MetaData: 1`.
fn wants_icy_metadata(headers: &HeaderMap) -> bool {
    headers
        .get(ICY_REQUEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        == Some("1")
}

/// Serves the live MP3 broadcast.
///
/// Registers a session with the engine and returns a chunked body fed by the
/// dispatcher. The session ends when the body is dropped (client gone) or
/// when the engine ends it.
async fn stream_audio(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> TidecastResult<Response> {
    if !is_stream_request(uri.path()) {
        return Err(TidecastError::NotFound(uri.path().to_string()));
    }

    let wants_icy = wants_icy_metadata(&headers);
    let (connection, rx) = ChannelConnection::new(remote_addr);
    let mut handle = state.engine.start_session(connection, wants_icy)?;

    log::info!(
        "[Server] Stream request from {} ({}), icy={}",
        remote_addr,
        uri.path(),
        wants_icy
    );

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)
        .header(header::SERVER, server_header())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, STREAM_EXPIRES)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, CORS_ALLOW_METHODS);

    if wants_icy {
        let library_name = state.config.read().library_name.clone();
        builder = builder
            .header("icy-name", library_name)
            .header("icy-metaint", ICY_METAINT.to_string());
    }

    // The handle lives as long as the body; dropping it ends the session
    let body = UnboundedReceiverStream::new(rx).map(move |chunk: Bytes| {
        handle.record_chunk(chunk.len());
        Ok::<Bytes, Infallible>(chunk)
    });

    builder
        .body(Body::from_stream(body))
        .map_err(|e| TidecastError::Internal(e.to_string()))
}
