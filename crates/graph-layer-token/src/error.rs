//! Error types for the token broker.

use graph_layer_oauth::OAuthError;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, TokenError>;

/// Errors raised while resolving, refreshing or persisting tokens.
///
/// `Clone` so one single-flight outcome can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    /// No record for the token id.
    #[error("Token not found: {0}")]
    NotFound(String),

    /// Token is expired and cannot be refreshed.
    #[error("Token expired: {0}")]
    Expired(String),

    /// Record is unusable (unparsable payload, wrong kind of token).
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// Application missing or not configured for the request.
    #[error("Config error: {0}")]
    Config(String),

    /// OAuth provider call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Token store failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl TokenError {
    /// Whether the store can no longer be trusted and the process should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TokenError::Storage(_))
    }
}

impl From<rusqlite::Error> for TokenError {
    fn from(e: rusqlite::Error) -> Self {
        TokenError::Storage(e.to_string())
    }
}

impl From<OAuthError> for TokenError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::Config(msg) => TokenError::Config(msg),
            other => TokenError::Upstream(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for TokenError {
    fn from(e: tokio::task::JoinError) -> Self {
        TokenError::Upstream(format!("Token operation aborted: {}", e))
    }
}
