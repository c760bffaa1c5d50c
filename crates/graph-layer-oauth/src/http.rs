//! OAuth client for identity-platform style authorities.
//!
//! Endpoints live under `<cloud_url>/<tenant_id>/oauth2/v2.0/`:
//! `authorize`, `token` and `logout`.

use std::sync::Arc;

use async_trait::async_trait;
use graph_layer_config::ApplicationConfig;
use serde::Deserialize;

use crate::client::{OAuthClient, TokenPayload};
use crate::error::{OAuthError, Result};
use crate::registry::ClientFactory;

/// Scopes always requested so the provider issues refresh and id tokens.
const RESERVED_SCOPES: [&str; 2] = ["offline_access", "openid"];

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Provider error body.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// reqwest-backed [`OAuthClient`] for one application.
#[derive(Debug, Clone)]
pub struct HttpOAuthClient {
    http: reqwest::Client,
    config: ApplicationConfig,
}

impl HttpOAuthClient {
    pub fn new(http: reqwest::Client, config: ApplicationConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/oauth2/v2.0/{}", self.config.authority(), name)
    }

    /// Configured scopes plus the reserved ones, space separated.
    fn scope(&self) -> String {
        let mut scopes: Vec<&str> = self.config.scopes.iter().map(String::as_str).collect();
        for reserved in RESERVED_SCOPES {
            if !scopes.contains(&reserved) {
                scopes.push(reserved);
            }
        }
        scopes.join(" ")
    }

    async fn request_token(
        &self,
        grant: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<TokenPayload> {
        params.push(("grant_type", grant.to_string()));
        params.push(("client_id", self.config.client_id.clone()));
        params.push(("scope", self.scope()));
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.clone()));
        }

        let response = self
            .http
            .post(self.endpoint("token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::Network(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::Network(format!("Failed to read token response: {}", e)))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => body,
            };
            tracing::warn!(grant, %status, app = %self.config.client_id, "Token request rejected");
            return Err(OAuthError::Backend(format!(
                "{} grant failed ({}): {}",
                grant, status, message
            )));
        }

        let raw: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            OAuthError::Serialization(format!("Failed to parse token response: {}", e))
        })?;

        Ok(normalize(raw, chrono::Utc::now().timestamp()))
    }
}

fn normalize(raw: TokenResponse, now: i64) -> TokenPayload {
    TokenPayload {
        access_token: raw.access_token,
        refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
        expires_on: now + raw.expires_in,
        scopes: raw
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        id_token: raw.id_token,
        token_type: raw.token_type.unwrap_or_else(|| "Bearer".to_string()),
    }
}

/// Pull the authorization code out of a callback query string.
fn parse_callback(query_string: &str) -> Result<String> {
    let query = query_string.trim().trim_start_matches('?');
    let mut code = None;
    let mut error = None;
    let mut description = None;

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(OAuthError::Backend(match description {
            Some(desc) => format!("{}: {}", error, desc),
            None => error,
        }));
    }

    match code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(OAuthError::InvalidRequest(
            "Callback query has no authorization code".to_string(),
        )),
    }
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    fn auth_code_url(&self, state: &str) -> Result<String> {
        let scope = self.scope();
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_mode", "query"),
            ("scope", scope.as_str()),
            ("state", state),
        ];

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{}?{}", self.endpoint("authorize"), query))
    }

    async fn acquire_token_by_code(&self, query_string: &str) -> Result<TokenPayload> {
        let code = parse_callback(query_string)?;
        self.request_token(
            "authorization_code",
            vec![
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.clone()),
            ],
        )
        .await
    }

    async fn acquire_token_by_refresh_token(
        &self,
        payload: &TokenPayload,
    ) -> Result<TokenPayload> {
        let refresh_token = payload
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("No refresh token available".to_string()))?;

        let mut refreshed = self
            .request_token("refresh_token", vec![("refresh_token", refresh_token.clone())])
            .await?;

        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        Ok(refreshed)
    }

    async fn acquire_token_by_username_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenPayload> {
        self.request_token(
            "password",
            vec![
                ("username", username.to_string()),
                ("password", password.to_string()),
            ],
        )
        .await
    }

    fn logout_url(&self) -> String {
        let base = self.endpoint("logout");
        match &self.config.post_logout_redirect_uri {
            Some(uri) => format!(
                "{}?post_logout_redirect_uri={}",
                base,
                urlencoding::encode(uri)
            ),
            None => base,
        }
    }
}

/// Builds [`HttpOAuthClient`]s sharing one connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    http: reqwest::Client,
}

impl HttpClientFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(&self, _app_id: &str, config: &ApplicationConfig) -> Result<Arc<dyn OAuthClient>> {
        Ok(Arc::new(HttpOAuthClient::new(self.http.clone(), config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_config(cloud_url: &str) -> ApplicationConfig {
        ApplicationConfig {
            client_id: "client-1".to_string(),
            client_secret: Some("secret".to_string()),
            cloud_url: cloud_url.to_string(),
            tenant_id: "contoso".to_string(),
            scopes: vec!["User.Read".to_string(), "openid".to_string()],
            redirect_uri: "https://app.example.com/callback".to_string(),
            post_logout_redirect_uri: None,
            anonymous: None,
        }
    }

    fn client(cloud_url: &str) -> HttpOAuthClient {
        HttpOAuthClient::new(reqwest::Client::new(), app_config(cloud_url))
    }

    #[test]
    fn test_auth_code_url() {
        let url = client("https://login.example.com")
            .auth_code_url("state-1")
            .unwrap();
        assert!(url.starts_with("https://login.example.com/contoso/oauth2/v2.0/authorize?"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcallback"));
        assert!(url.contains("scope=User.Read%20openid%20offline_access"));
        assert!(url.contains("state=state-1"));
    }

    #[test]
    fn test_logout_url() {
        let mut config = app_config("https://login.example.com/");
        assert_eq!(
            HttpOAuthClient::new(reqwest::Client::new(), config.clone()).logout_url(),
            "https://login.example.com/contoso/oauth2/v2.0/logout"
        );

        config.post_logout_redirect_uri = Some("https://app.example.com/".to_string());
        assert_eq!(
            HttpOAuthClient::new(reqwest::Client::new(), config).logout_url(),
            "https://login.example.com/contoso/oauth2/v2.0/logout?post_logout_redirect_uri=https%3A%2F%2Fapp.example.com%2F"
        );
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(parse_callback("code=abc&state=s").unwrap(), "abc");
        assert_eq!(parse_callback("?state=s&code=a%2Bb").unwrap(), "a+b");
        assert!(matches!(
            parse_callback("state=s"),
            Err(OAuthError::InvalidRequest(_))
        ));
        let err = parse_callback("error=access_denied&error_description=User+declined").unwrap_err();
        assert!(err.to_string().contains("access_denied: User declined"));
    }

    #[tokio::test]
    async fn test_acquire_token_by_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
                "scope": "User.Read openid",
                "id_token": "id-1",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let before = chrono::Utc::now().timestamp();
        let payload = client(&server.uri())
            .acquire_token_by_code("code=abc&state=xyz")
            .await
            .unwrap();

        assert_eq!(payload.access_token, "at-1");
        assert_eq!(payload.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(payload.scopes, vec!["User.Read", "openid"]);
        assert!(payload.expires_on >= before + 3600);
    }

    #[tokio::test]
    async fn test_refresh_carries_refresh_token_forward() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "expires_in": 60
            })))
            .mount(&server)
            .await;

        let old = TokenPayload {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-old".to_string()),
            expires_on: 0,
            scopes: vec![],
            id_token: None,
            token_type: "Bearer".to_string(),
        };
        let payload = client(&server.uri())
            .acquire_token_by_refresh_token(&old)
            .await
            .unwrap();
        assert_eq!(payload.access_token, "at-2");
        assert_eq!(payload.refresh_token.as_deref(), Some("rt-old"));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let old = TokenPayload {
            access_token: "at-1".to_string(),
            refresh_token: None,
            expires_on: 0,
            scopes: vec![],
            id_token: None,
            token_type: "Bearer".to_string(),
        };
        let result = client("http://127.0.0.1:1")
            .acquire_token_by_refresh_token(&old)
            .await;
        assert!(matches!(result, Err(OAuthError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_password_grant_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "bad credentials"
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .acquire_token_by_username_password("svc", "wrong")
            .await
            .unwrap_err();
        match err {
            OAuthError::Backend(msg) => assert!(msg.contains("invalid_grant: bad credentials")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
