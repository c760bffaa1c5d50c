//! Token endpoint actions.

use std::sync::Arc;

use graph_layer_oauth::Application;
use graph_layer_token::{Token, TokenError, TokenManager, generate_token_id};
use serde_json::json;
use tracing::{debug, info};

use super::protocol::{Reply, Request};
use super::sessions::SessionStore;
use crate::error::{EndpointError, Result};
use crate::upstream::UpstreamClient;

/// Executes protocol requests against the token manager.
#[derive(Debug)]
pub struct TokenService {
    manager: TokenManager,
    sessions: SessionStore,
    upstream: UpstreamClient,
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(EndpointError::Endpoint(format!("Message missing {}", field)));
    }
    Ok(value)
}

impl TokenService {
    pub fn new(manager: TokenManager, sessions: SessionStore, upstream: UpstreamClient) -> Self {
        Self {
            manager,
            sessions,
            upstream,
        }
    }

    pub fn manager(&self) -> &TokenManager {
        &self.manager
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run one request to completion.
    pub async fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Auth { app_id } => self.auth(&app_id),
            Request::Callback {
                app_id,
                session_id,
                query_string,
            } => self.callback(&app_id, &session_id, &query_string).await,
            Request::Check { app_id, session_id } => self.check(&app_id, &session_id).await,
            Request::Clear { app_id, session_id } => self.clear(&app_id, &session_id),
            Request::UserInfo {
                app_id,
                session_id,
                select,
            } => self.user_info(&app_id, &session_id, &select).await,
        }
    }

    fn application(&self, app_id: &str) -> Result<Arc<Application>> {
        self.manager
            .apps()
            .get_application(app_id)
            .map_err(|e| EndpointError::Upstream(e.to_string()))?
            .ok_or_else(|| {
                EndpointError::Endpoint(format!("No such application having ID '{}'", app_id))
            })
    }

    /// Load a user token and check it belongs to `app_id`.
    fn owned_user_token(&self, app_id: &str, token_id: &str) -> Result<Token> {
        let token = self.manager.get(token_id)?.ok_or_else(|| {
            EndpointError::Endpoint("The session is invalid: no token for session".to_string())
        })?;
        if token.app_id() != app_id {
            return Err(EndpointError::Endpoint(
                "The associated token does not belong to the indicated application".to_string(),
            ));
        }
        if !token.is_user() {
            return Err(EndpointError::Endpoint(
                "The session token is invalid".to_string(),
            ));
        }
        Ok(token)
    }

    fn auth(&self, app_id: &str) -> Result<Reply> {
        let app_id = require("appId", app_id)?;
        let app = self.application(app_id)?;

        let session = self.sessions.create(app_id);
        let uri = match app.client().auth_code_url(&session.session_id) {
            Ok(uri) => uri,
            Err(e) => {
                self.sessions.remove(&session.session_id);
                return Err(EndpointError::Upstream(format!(
                    "Failed to initiate authentication: {}",
                    e
                )));
            }
        };

        debug!(app_id, "Login session created");
        Ok(Reply::Redirect {
            session_id: session.session_id,
            timeout: session.timeout,
            uri,
        })
    }

    async fn callback(&self, app_id: &str, session_id: &str, query_string: &str) -> Result<Reply> {
        let app_id = require("appId", app_id)?;
        let session_id = require("sessionId", session_id)?;
        let query_string = require("queryString", query_string)?;

        let session = self.sessions.validate(session_id, app_id)?;
        let app = self.application(&session.app_id)?;

        let payload = app
            .client()
            .acquire_token_by_code(query_string)
            .await
            .map_err(|e| {
                EndpointError::Upstream(format!("Failed to acquire access token: {}", e))
            })?;

        let token_id = generate_token_id();
        self.manager.set(&token_id, &session.app_id, true, &payload)?;
        self.sessions.remove(&session.session_id);

        info!(app_id, "User login completed");
        Ok(Reply::Complete {
            session_id: token_id,
        })
    }

    async fn check(&self, app_id: &str, token_id: &str) -> Result<Reply> {
        let app_id = require("appId", app_id)?;
        let token_id = require("sessionId", token_id)?;
        let token = self.owned_user_token(app_id, token_id)?;

        match self.manager.ensure_fresh(token).await {
            Ok((_, freshness)) => Ok(Reply::Success(json!({
                "message": "Token is valid",
                "type": freshness.as_str(),
            }))),
            Err(e @ (TokenError::Expired(_) | TokenError::Upstream(_))) => {
                debug!(app_id, error = %e, "Token check failed");
                Ok(Reply::Failure(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self, app_id: &str, token_id: &str) -> Result<Reply> {
        let app_id = require("appId", app_id)?;
        let token_id = require("sessionId", token_id)?;
        self.owned_user_token(app_id, token_id)?;
        let app = self.application(app_id)?;

        self.manager.remove(token_id)?;

        info!(app_id, "User token removed");
        Ok(Reply::Success(json!({
            "message": "Token was removed",
            "logoutUrl": app.client().logout_url(),
        })))
    }

    async fn user_info(&self, app_id: &str, token_id: &str, select: &[String]) -> Result<Reply> {
        let app_id = require("appId", app_id)?;
        let token_id = require("sessionId", token_id)?;
        let token = self.owned_user_token(app_id, token_id)?;

        let (token, _) = self.manager.ensure_fresh(token).await?;
        let profile = self.upstream.get_profile(&token, select).await?;
        Ok(Reply::Success(profile))
    }
}
