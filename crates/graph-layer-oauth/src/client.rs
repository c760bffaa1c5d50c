//! Provider-neutral token payload and the OAuth client capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Normalized token set returned by every grant.
///
/// This is also the persisted form of a token record, so the JSON shape
/// (camelCase, `expiresOn` in epoch seconds) must stay stable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as a unix timestamp in seconds.
    pub expires_on: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenPayload {
    /// Whether a non-empty refresh credential is present.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Value for an `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for TokenPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPayload")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_on", &self.expires_on)
            .field("scopes", &self.scopes)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Per-application OAuth capability.
///
/// Each grant returns a normalized [`TokenPayload`] or fails with a provider
/// error.
#[async_trait]
pub trait OAuthClient: Send + Sync + std::fmt::Debug {
    /// Authorization URL the browser should be sent to.
    fn auth_code_url(&self, state: &str) -> Result<String>;

    /// Exchange the callback query string (`code=...&state=...`) for tokens.
    async fn acquire_token_by_code(&self, query_string: &str) -> Result<TokenPayload>;

    /// Redeem the refresh credential carried by `payload`.
    async fn acquire_token_by_refresh_token(&self, payload: &TokenPayload)
    -> Result<TokenPayload>;

    /// Resource-owner password grant.
    async fn acquire_token_by_username_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenPayload>;

    /// Provider logout URL.
    fn logout_url(&self) -> String;
}
