//! Scripted OAuth client for tests.
//!
//! [`MockOAuthClient`] issues deterministic tokens, counts every grant and can
//! be told to fail or stall. [`MockClientFactory`] hands the same mock back for
//! an application id across registry reloads so tests can inspect it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use graph_layer_config::{AnonymousCredentials, ApplicationConfig};
use parking_lot::Mutex;

use crate::client::{OAuthClient, TokenPayload};
use crate::error::{OAuthError, Result};
use crate::registry::ClientFactory;

#[derive(Debug, Clone)]
struct MockSettings {
    lifetime_secs: i64,
    issue_refresh_token: bool,
    delay: Duration,
    fail_code: bool,
    fail_refresh: bool,
    fail_password: bool,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            lifetime_secs: 3600,
            issue_refresh_token: true,
            delay: Duration::ZERO,
            fail_code: false,
            fail_refresh: false,
            fail_password: false,
        }
    }
}

/// Mock OAuth client.
#[derive(Debug)]
pub struct MockOAuthClient {
    app_id: String,
    settings: Mutex<MockSettings>,
    issued: AtomicUsize,
    code_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    password_calls: AtomicUsize,
}

impl MockOAuthClient {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            settings: Mutex::new(MockSettings::default()),
            issued: AtomicUsize::new(0),
            code_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            password_calls: AtomicUsize::new(0),
        }
    }

    /// Seconds until issued tokens expire. Negative values issue expired tokens.
    pub fn set_lifetime(&self, secs: i64) {
        self.settings.lock().lifetime_secs = secs;
    }

    /// Whether issued tokens carry a refresh credential.
    pub fn set_issue_refresh_token(&self, issue: bool) {
        self.settings.lock().issue_refresh_token = issue;
    }

    /// Latency added to every grant.
    pub fn set_delay(&self, delay: Duration) {
        self.settings.lock().delay = delay;
    }

    pub fn set_fail_code(&self, fail: bool) {
        self.settings.lock().fail_code = fail;
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.settings.lock().fail_refresh = fail;
    }

    pub fn set_fail_password(&self, fail: bool) {
        self.settings.lock().fail_password = fail;
    }

    pub fn code_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn password_calls(&self) -> usize {
        self.password_calls.load(Ordering::SeqCst)
    }

    async fn issue(&self, kind: &str, fail: impl Fn(&MockSettings) -> bool) -> Result<TokenPayload> {
        let settings = self.settings.lock().clone();
        if !settings.delay.is_zero() {
            tokio::time::sleep(settings.delay).await;
        }
        if fail(&settings) {
            return Err(OAuthError::Backend(format!("mock {} grant rejected", kind)));
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenPayload {
            access_token: format!("mock-{}-{}-{}", self.app_id, kind, n),
            refresh_token: settings
                .issue_refresh_token
                .then(|| format!("mock-refresh-{}-{}", self.app_id, n)),
            expires_on: chrono::Utc::now().timestamp() + settings.lifetime_secs,
            scopes: vec!["User.Read".to_string()],
            id_token: None,
            token_type: "Bearer".to_string(),
        })
    }
}

#[async_trait]
impl OAuthClient for MockOAuthClient {
    fn auth_code_url(&self, state: &str) -> Result<String> {
        Ok(format!(
            "https://login.mock/{}/authorize?state={}",
            self.app_id,
            urlencoding::encode(state)
        ))
    }

    async fn acquire_token_by_code(&self, query_string: &str) -> Result<TokenPayload> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        let has_code = url::form_urlencoded::parse(query_string.trim_start_matches('?').as_bytes())
            .any(|(k, v)| k == "code" && !v.is_empty());
        if !has_code {
            return Err(OAuthError::InvalidRequest(
                "Callback query has no authorization code".to_string(),
            ));
        }
        self.issue("code", |s| s.fail_code).await
    }

    async fn acquire_token_by_refresh_token(
        &self,
        payload: &TokenPayload,
    ) -> Result<TokenPayload> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !payload.has_refresh_token() {
            return Err(OAuthError::InvalidRequest(
                "No refresh token available".to_string(),
            ));
        }
        let mut refreshed = self.issue("refresh", |s| s.fail_refresh).await?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = payload.refresh_token.clone();
        }
        Ok(refreshed)
    }

    async fn acquire_token_by_username_password(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<TokenPayload> {
        self.password_calls.fetch_add(1, Ordering::SeqCst);
        self.issue("password", |s| s.fail_password).await
    }

    fn logout_url(&self) -> String {
        format!("https://login.mock/{}/logout", self.app_id)
    }
}

/// Factory handing out one shared [`MockOAuthClient`] per application id.
#[derive(Debug, Default)]
pub struct MockClientFactory {
    clients: Mutex<HashMap<String, Arc<MockOAuthClient>>>,
    created: AtomicUsize,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mock used for `app_id`, created on first request.
    pub fn client(&self, app_id: &str) -> Arc<MockOAuthClient> {
        Arc::clone(
            self.clients
                .lock()
                .entry(app_id.to_string())
                .or_insert_with(|| Arc::new(MockOAuthClient::new(app_id))),
        )
    }

    /// Number of times the registry asked for a client.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ClientFactory for MockClientFactory {
    fn create(&self, app_id: &str, _config: &ApplicationConfig) -> Result<Arc<dyn OAuthClient>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.client(app_id))
    }
}

/// Application config suitable for mocks, optionally with an anonymous identity.
pub fn mock_app_config(with_anonymous: bool) -> ApplicationConfig {
    ApplicationConfig {
        client_id: "mock-client".to_string(),
        client_secret: None,
        cloud_url: "https://login.mock".to_string(),
        tenant_id: "mock-tenant".to_string(),
        scopes: vec!["User.Read".to_string()],
        redirect_uri: "https://app.mock/callback".to_string(),
        post_logout_redirect_uri: None,
        anonymous: with_anonymous.then(|| AnonymousCredentials {
            username: "svc@mock".to_string(),
            password: "mock-password".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_issues_distinct_tokens() {
        let mock = MockOAuthClient::new("app");
        let a = mock.acquire_token_by_username_password("u", "p").await.unwrap();
        let b = mock.acquire_token_by_code("code=x").await.unwrap();
        assert_ne!(a.access_token, b.access_token);
        assert_eq!(mock.password_calls(), 1);
        assert_eq!(mock.code_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let mock = MockOAuthClient::new("app");
        mock.set_fail_password(true);
        assert!(mock.acquire_token_by_username_password("u", "p").await.is_err());
        assert!(mock.acquire_token_by_code("state=only").await.is_err());

        mock.set_issue_refresh_token(false);
        let token = mock.acquire_token_by_code("code=x").await.unwrap();
        assert!(!token.has_refresh_token());
        assert!(mock.acquire_token_by_refresh_token(&token).await.is_err());
        assert_eq!(mock.refresh_calls(), 1);
    }

    #[test]
    fn test_factory_shares_clients() {
        let factory = MockClientFactory::new();
        let a = factory.client("app");
        let b = factory.client("app");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.created(), 0);
    }
}
