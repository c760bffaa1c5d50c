//! Client for the upstream REST API.

use graph_layer_token::Token;

use crate::error::{EndpointError, Result};

/// User-Agent sent on every upstream request.
pub const USER_AGENT: &str = concat!("graph-layer/", env!("CARGO_PKG_VERSION"));

/// Upstream API client shared by both endpoints.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    profile_path: String,
}

impl UpstreamClient {
    /// Build a client for `base_url` (e.g. `https://graph.microsoft.com/v1.0`).
    ///
    /// Redirects are relayed to the caller rather than followed.
    pub fn new(base_url: impl Into<String>, profile_path: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| EndpointError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile_path: profile_path.into(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute upstream URL for a path (with optional query) relative to the base.
    pub fn url_for(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base_url, path_and_query)
        } else {
            format!("{}/{}", self.base_url, path_and_query)
        }
    }

    /// Look up the signed-in user's profile, optionally limited to `select` fields.
    pub async fn get_profile(&self, token: &Token, select: &[String]) -> Result<serde_json::Value> {
        let mut url = self.url_for(&self.profile_path);
        if !select.is_empty() {
            url = format!("{}?$select={}", url, urlencoding::encode(&select.join(",")));
        }

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, token.payload().authorization())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| EndpointError::Upstream(format!("Profile request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EndpointError::Upstream(format!(
                "Profile lookup failed ({}): {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EndpointError::Upstream(format!("Failed to parse profile: {}", e)))
    }
}
