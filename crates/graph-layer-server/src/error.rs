//! Error types for the token endpoint and the proxy endpoint.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use graph_layer_token::TokenError;
use serde::Serialize;
use thiserror::Error;

/// Token endpoint error type.
///
/// `Protocol` and `Endpoint` display their message verbatim, since that text
/// is what the client receives in an `error` reply.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Invalid endpoint configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed client message.
    #[error("{0}")]
    Protocol(String),

    /// Business-rule violation (unknown app, session or ownership mismatch).
    #[error("{0}")]
    Endpoint(String),

    /// Token could not be resolved or refreshed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// OAuth provider or upstream API call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Unrecoverable; the process should stop.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl EndpointError {
    pub fn is_fatal(&self) -> bool {
        match self {
            EndpointError::Fatal(_) => true,
            EndpointError::Token(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result type for token endpoint operations.
pub type Result<T> = std::result::Result<T, EndpointError>;

/// Proxy endpoint error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Path rejected by the path filter.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No usable caller identity.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Token could not be resolved for the caller identity.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Request body over the configured limit.
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Method the upstream dispatch does not support.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Upstream API call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::Token(e) if e.is_fatal() => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Token(_) => StatusCode::UNAUTHORIZED,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::UnsupportedMethod(_)
            | ProxyError::Upstream(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ProxyError::NotFound(_) => "not_found",
            ProxyError::Unauthorized(_) => "unauthorized",
            ProxyError::Token(e) if e.is_fatal() => "storage_error",
            ProxyError::Token(_) => "invalid_token",
            ProxyError::PayloadTooLarge(_) => "payload_too_large",
            ProxyError::UnsupportedMethod(_) => "unsupported_method",
            ProxyError::Upstream(_) => "upstream_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, code, error = %message, "Proxy error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Proxy request rejected");
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
