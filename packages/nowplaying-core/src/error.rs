//! Centralized error types for the now-playing core library.
//!
//! This module provides a unified error handling system that:
//! - Defines the playback error taxonomy using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::lyrics::LyricsError;
use crate::spotify::SpotifyError;
use crate::store::StoreError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for SpotifyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::Status(401, _) => "auth_expired",
            Self::Status(_, _) => "http_error_status",
            Self::Auth(_) => "auth_failed",
            Self::Parse(_) => "parse_error",
            Self::WebSocket(_) => "websocket_error",
            Self::Handshake(_) => "dealer_handshake_failed",
        }
    }
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "store_io_failed",
            Self::Json(_) => "store_corrupt",
        }
    }
}

impl ErrorCode for LyricsError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::Status(_) => "http_error_status",
        }
    }
}

/// Playback-domain error taxonomy.
///
/// Handler-internal faults are surfaced as `error` events; this type is what
/// handler methods return and what the HTTP layer renders.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PlaybackError {
    /// Handler configuration failed validation; activation was aborted.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Upstream rejected our credentials and the single refresh did not help.
    #[error("Authorization expired: {0}")]
    AuthExpired(String),

    /// The realtime channel dropped or the handler has no live session.
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// The active backend does not offer this capability.
    #[error("Unsupported by active backend: {0}")]
    Unsupported(String),

    /// A best-effort upstream lookup failed.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Client input could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Establishing the upstream connection failed.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Reading or writing persisted state failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Shorthand for an [`PlaybackError::Unsupported`] naming a capability.
    pub fn unsupported(capability: impl Into<String>) -> Self {
        Self::Unsupported(capability.into())
    }

    /// Returns true for errors callers must treat as expected, not faults.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigInvalid(_) | Self::MalformedMessage(_) => StatusCode::BAD_REQUEST,
            Self::AuthExpired(_) => StatusCode::UNAUTHORIZED,
            Self::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::TransportClosed(_) | Self::UpstreamUnavailable(_) | Self::Setup(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for PlaybackError {
    fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config_invalid",
            Self::AuthExpired(_) => "auth_expired",
            Self::TransportClosed(_) => "transport_closed",
            Self::Unsupported(_) => "unsupported",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::MalformedMessage(_) => "malformed_message",
            Self::Setup(_) => "setup_failed",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::spotify::SpotifyResult;
pub use crate::store::StoreResult;

/// Convenient Result alias for playback operations.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for PlaybackError {
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

impl From<SpotifyError> for PlaybackError {
    fn from(err: SpotifyError) -> Self {
        match err {
            SpotifyError::Status(401, body) => Self::AuthExpired(body),
            SpotifyError::Auth(msg) => Self::AuthExpired(msg),
            SpotifyError::WebSocket(e) => Self::TransportClosed(e.to_string()),
            SpotifyError::Handshake(msg) => Self::Setup(msg),
            other => Self::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for PlaybackError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}
