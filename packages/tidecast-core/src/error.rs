//! Centralized error types for the tidecast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::stream::AudioQuality;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// The input format cannot be turned into a broadcast stream.
///
/// Sticky: once raised, every new listener is rejected until the engine is
/// restarted.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Raw PCM decoding is only implemented for 16, 24 and 32 bit samples.
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    /// Zero sample rate or zero channels.
    #[error("invalid input quality {0}")]
    InvalidQuality(AudioQuality),

    /// The target codec could not be configured.
    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),
}

/// A single frame could not be encoded. Transient: the frame is dropped.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// No input quality has been negotiated yet.
    #[error("input quality not negotiated")]
    NotNegotiated,

    /// The pipeline is in the sticky unsupported state.
    #[error("streaming not supported")]
    NotSupported,

    /// The codec rejected the frame.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Producer-side write failure. Never escalated beyond a log line.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is at capacity; the frame is dropped.
    #[error("channel full")]
    Full,

    /// The consumer side is gone.
    #[error("channel closed")]
    Closed,
}

/// Building a spliced chunk for one session failed.
#[derive(Debug, Error)]
pub enum SpliceError {
    /// The output buffer could not be allocated.
    #[error("could not allocate {requested} bytes for spliced chunk")]
    Allocation { requested: usize },
}

/// A chunk could not be handed to a listener connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The reply has already ended.
    #[error("connection closed")]
    Closed,
}

/// Why a listener request was refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The broadcast format cannot be produced.
    #[error("streaming not supported")]
    NotSupported,

    /// The engine has been stopped.
    #[error("streaming engine stopped")]
    EngineStopped,
}

impl ErrorCode for FormatError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedBitDepth(_) => "unsupported_bit_depth",
            Self::InvalidQuality(_) => "invalid_quality",
            Self::EncoderUnavailable(_) => "encoder_unavailable",
        }
    }
}

impl ErrorCode for EncodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotNegotiated => "quality_not_negotiated",
            Self::NotSupported => "not_supported",
            Self::Codec(_) => "encode_failed",
        }
    }
}

impl ErrorCode for ChannelError {
    fn code(&self) -> &'static str {
        match self {
            Self::Full => "channel_full",
            Self::Closed => "channel_closed",
        }
    }
}

/// Application-wide error type for the tidecast server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum TidecastError {
    /// Nothing is served at the requested path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The broadcast stream cannot be produced right now.
    #[error("Streaming not supported: {0}")]
    NotSupported(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (invalid or missing settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TidecastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotSupported(_) => "not_supported",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    ///
    /// An unsupported stream answers like a missing resource so listeners
    /// give up instead of retrying.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::NotSupported(_) => StatusCode::NOT_FOUND,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type TidecastResult<T> = Result<T, TidecastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for TidecastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<RejectReason> for TidecastError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::NotSupported => Self::NotSupported(reason.to_string()),
            RejectReason::EngineStopped => Self::NotFound(reason.to_string()),
        }
    }
}

impl From<FormatError> for TidecastError {
    fn from(err: FormatError) -> Self {
        Self::NotSupported(err.to_string())
    }
}
