//! Token manager: the single source of "a currently valid token".
//!
//! Reads and writes go straight to the [`SqliteTokenStore`]. Anything that
//! calls the OAuth provider for a shared identity goes through a
//! [`SingleFlight`] gate:
//!
//! - `Acquire(appId)`: password grant for an application's anonymous token
//! - `Refresh(appId)`: refresh of an application's anonymous token
//! - `RefreshUser(tokenId)`: refresh of one delegated user token
//!
//! Inside a gate the store is re-read first, so a caller that queued behind a
//! finished flight picks up the stored result instead of redeeming again.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use graph_layer_oauth::{Application, ApplicationRegistry, TokenPayload};
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::error::{Result, TokenError};
use crate::flight::{FlightKey, SingleFlight};
use crate::store::{SqliteTokenStore, TokenRecord};
use crate::token::Token;

/// Days an expired token is kept before cleanup purges it.
pub const DEFAULT_GRACE_DAYS: u32 = 15;

/// Deterministic id of an application's anonymous token.
pub fn anonymous_token_id(app_id: &str) -> String {
    format!("anonymous:{}", app_id)
}

/// Fresh opaque token id: 32 random bytes, base64url without padding.
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether a returned token was already valid or had to be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Reused,
    Refreshed,
}

impl Freshness {
    /// Wire name used in `check` replies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Reused => "reuse",
            Freshness::Refreshed => "refresh",
        }
    }
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    /// Records whose payload failed to parse.
    pub unparsable: usize,
    /// Records past the grace period.
    pub expired: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.unparsable + self.expired
    }
}

struct ManagerInner {
    store: Arc<SqliteTokenStore>,
    apps: Arc<ApplicationRegistry>,
    flights: SingleFlight<FlightKey, Token, TokenError>,
    grace_days: u32,
}

/// Token retrieval, refresh, anonymous acquisition and cleanup.
///
/// Cheap to clone; clones share the store and the single-flight gates.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
}

impl TokenManager {
    pub fn new(
        store: Arc<SqliteTokenStore>,
        apps: Arc<ApplicationRegistry>,
        grace_days: u32,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                apps,
                flights: SingleFlight::new(),
                grace_days,
            }),
        }
    }

    pub fn store(&self) -> &Arc<SqliteTokenStore> {
        &self.inner.store
    }

    pub fn apps(&self) -> &Arc<ApplicationRegistry> {
        &self.inner.apps
    }

    pub fn grace_days(&self) -> u32 {
        self.inner.grace_days
    }

    fn application(&self, app_id: &str) -> Result<Arc<Application>> {
        self.inner.apps.get_application(app_id)?.ok_or_else(|| {
            TokenError::Config(format!("No such application having ID '{}'", app_id))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Operations
// ─────────────────────────────────────────────────────────────────────────────

fn parse_payload(token_id: &str, value: &str) -> Result<TokenPayload> {
    serde_json::from_str(value).map_err(|e| {
        debug!(error = %e, "Unparsable token payload");
        TokenError::Invalid(format!("Cannot parse token for '{}'", redact(token_id)))
    })
}

fn to_record(
    token_id: &str,
    app_id: &str,
    is_user: bool,
    payload: &TokenPayload,
) -> Result<TokenRecord> {
    let value = serde_json::to_string(payload)
        .map_err(|e| TokenError::Invalid(format!("Cannot serialize token: {}", e)))?;
    Ok(TokenRecord {
        token_id: token_id.to_string(),
        app_id: app_id.to_string(),
        is_user,
        value,
    })
}

/// Short, log-safe form of a token id.
fn redact(token_id: &str) -> String {
    if token_id.starts_with("anonymous:") {
        return token_id.to_string();
    }
    let prefix: String = token_id.chars().take(6).collect();
    format!("{}…", prefix)
}

impl TokenManager {
    /// Load a token record. Fails with `Invalid` if its payload does not parse.
    pub fn get(&self, token_id: &str) -> Result<Option<Token>> {
        let Some(record) = self.inner.store.get(token_id)? else {
            return Ok(None);
        };
        let payload = parse_payload(token_id, &record.value)?;
        Ok(Some(Token::new(
            record.token_id,
            record.app_id,
            record.is_user,
            payload,
        )))
    }

    /// Insert a new record.
    pub fn set(
        &self,
        token_id: &str,
        app_id: &str,
        is_user: bool,
        payload: &TokenPayload,
    ) -> Result<()> {
        let record = to_record(token_id, app_id, is_user, payload)?;
        self.inner.store.insert(&record)
    }

    /// Replace a record (or create it) with delete-then-insert in one transaction.
    pub fn update(
        &self,
        token_id: &str,
        app_id: &str,
        is_user: bool,
        payload: &TokenPayload,
    ) -> Result<()> {
        let record = to_record(token_id, app_id, is_user, payload)?;
        self.inner.store.with_transaction(|tx| {
            tx.delete(token_id)?;
            tx.insert(&record)
        })
    }

    /// Delete a record. Returns whether it existed.
    pub fn remove(&self, token_id: &str) -> Result<bool> {
        self.inner.store.delete(token_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Valid Tokens
// ─────────────────────────────────────────────────────────────────────────────

impl TokenManager {
    /// Load a token, refreshing it first if it has expired.
    pub async fn get_token(&self, token_id: &str) -> Result<Token> {
        let token = self.get(token_id)?.ok_or_else(|| {
            TokenError::NotFound(format!("No token for '{}'", redact(token_id)))
        })?;
        let (token, _) = self.ensure_fresh(token).await?;
        Ok(token)
    }

    /// [`get_token`](Self::get_token) restricted to delegated user tokens.
    pub async fn get_user_token(&self, token_id: &str) -> Result<Token> {
        let token = self.get(token_id)?.ok_or_else(|| {
            TokenError::NotFound(format!("No token for '{}'", redact(token_id)))
        })?;
        if !token.is_user() {
            return Err(TokenError::Invalid("Not a user token".to_string()));
        }
        let (token, _) = self.ensure_fresh(token).await?;
        Ok(token)
    }

    /// Return `token` if still valid, otherwise its refreshed replacement.
    pub async fn ensure_fresh(&self, token: Token) -> Result<(Token, Freshness)> {
        if !token.is_expired() {
            return Ok((token, Freshness::Reused));
        }
        let token = self.refresh_gated(token).await?;
        Ok((token, Freshness::Refreshed))
    }

    /// The application's anonymous token, acquiring or refreshing it as needed.
    pub async fn get_anonymous_token(&self, app_id: &str) -> Result<Token> {
        let app = self.application(app_id)?;
        if app.anonymous_credentials().is_none() {
            return Err(TokenError::Config(format!(
                "Application '{}' has no anonymous credentials",
                app_id
            )));
        }

        match self.get(&anonymous_token_id(app_id)) {
            Ok(Some(token)) if !token.is_expired() => return Ok(token),
            Ok(Some(token)) if token.payload().has_refresh_token() => {
                match self.refresh_gated(token).await {
                    Ok(token) => return Ok(token),
                    Err(TokenError::Upstream(e)) => {
                        warn!(app_id, error = %e, "Anonymous token refresh rejected, re-acquiring");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(_) => {}
            // An unparsable record is overwritten by the re-acquisition.
            Err(TokenError::Invalid(_)) => {}
            Err(e) => return Err(e),
        }

        self.acquire_anonymous(app_id).await
    }

    /// Redeem the token's refresh credential and persist the new payload.
    ///
    /// Not gated; callers that may race use [`ensure_fresh`](Self::ensure_fresh).
    pub async fn refresh_token(&self, token: &mut Token) -> Result<()> {
        if !token.payload().has_refresh_token() {
            return Err(TokenError::Expired(format!(
                "Token '{}' has expired and cannot be refreshed",
                redact(token.id())
            )));
        }
        let app = self.application(token.app_id())?;

        let payload = app
            .client()
            .acquire_token_by_refresh_token(token.payload())
            .await?;
        self.update(token.id(), token.app_id(), token.is_user(), &payload)?;
        token.refresh(payload);

        info!(
            app_id = token.app_id(),
            is_user = token.is_user(),
            "Token refreshed successfully"
        );
        Ok(())
    }

    async fn refresh_gated(&self, token: Token) -> Result<Token> {
        if !token.payload().has_refresh_token() {
            return Err(TokenError::Expired(format!(
                "Token '{}' has expired and cannot be refreshed",
                redact(token.id())
            )));
        }

        let key = if token.is_user() {
            FlightKey::RefreshUser(token.id().to_string())
        } else {
            FlightKey::Refresh(token.app_id().to_string())
        };
        let this = self.clone();

        self.inner
            .flights
            .run(key, move || async move {
                // Another flight may have refreshed it while we queued.
                let mut current = match this.get(token.id())? {
                    Some(current) if !current.is_expired() => return Ok(current),
                    Some(current) => current,
                    None => {
                        return Err(TokenError::NotFound(format!(
                            "No token for '{}'",
                            redact(token.id())
                        )));
                    }
                };
                this.refresh_token(&mut current).await?;
                Ok(current)
            })
            .await
    }

    async fn acquire_anonymous(&self, app_id: &str) -> Result<Token> {
        let this = self.clone();
        let app_id = app_id.to_string();

        self.inner
            .flights
            .run(FlightKey::Acquire(app_id.clone()), move || async move {
                let token_id = anonymous_token_id(&app_id);
                if let Ok(Some(current)) = this.get(&token_id)
                    && !current.is_expired()
                {
                    return Ok(current);
                }

                let app = this.application(&app_id)?;
                let creds = app.anonymous_credentials().cloned().ok_or_else(|| {
                    TokenError::Config(format!(
                        "Application '{}' has no anonymous credentials",
                        app_id
                    ))
                })?;

                let payload = app
                    .client()
                    .acquire_token_by_username_password(&creds.username, &creds.password)
                    .await?;
                this.update(&token_id, &app_id, false, &payload)?;

                info!(app_id = %app_id, "Anonymous token acquired");
                Ok(Token::new(token_id, app_id, false, payload))
            })
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cleanup
// ─────────────────────────────────────────────────────────────────────────────

impl TokenManager {
    /// Purge unparsable records and records expired for longer than the grace period.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        self.cleanup_at(chrono::Utc::now().timestamp())
    }

    pub fn cleanup_at(&self, now: i64) -> Result<CleanupReport> {
        let grace_days = self.inner.grace_days;

        let report = self.inner.store.with_transaction(|tx| {
            let mut report = CleanupReport::default();
            for record in tx.records()? {
                report.scanned += 1;
                let payload = match parse_payload(&record.token_id, &record.value) {
                    Ok(payload) => payload,
                    Err(_) => {
                        tx.delete(&record.token_id)?;
                        report.unparsable += 1;
                        continue;
                    }
                };
                let token = Token::new(record.token_id, record.app_id, record.is_user, payload);
                if token.is_expired_by_days_at(grace_days, now) {
                    tx.delete(token.id())?;
                    report.expired += 1;
                }
            }
            Ok(report)
        })?;

        if report.removed() > 0 {
            info!(
                scanned = report.scanned,
                unparsable = report.unparsable,
                expired = report.expired,
                "Token cleanup removed records"
            );
        } else {
            debug!(scanned = report.scanned, "Token cleanup found nothing to remove");
        }
        Ok(report)
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("grace_days", &self.inner.grace_days)
            .field("flights", &self.inner.flights)
            .finish()
    }
}
