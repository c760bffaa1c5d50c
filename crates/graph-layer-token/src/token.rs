//! Runtime view of one persisted token record.

use graph_layer_oauth::TokenPayload;

/// Seconds in one grace day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// A token record: id, owning application, kind and provider payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    id: String,
    app_id: String,
    is_user: bool,
    payload: TokenPayload,
}

impl Token {
    pub fn new(
        id: impl Into<String>,
        app_id: impl Into<String>,
        is_user: bool,
        payload: TokenPayload,
    ) -> Self {
        Self {
            id: id.into(),
            app_id: app_id.into(),
            is_user,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Delegated user token (as opposed to an application's anonymous token).
    pub fn is_user(&self) -> bool {
        self.is_user
    }

    pub fn payload(&self) -> &TokenPayload {
        &self.payload
    }

    pub fn access_token(&self) -> &str {
        &self.payload.access_token
    }

    pub fn expires_on(&self) -> i64 {
        self.payload.expires_on
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.payload.expires_on
    }

    /// Expired for at least `days` whole days. Only cleanup uses this.
    pub fn is_expired_by_days(&self, days: u32) -> bool {
        self.is_expired_by_days_at(days, chrono::Utc::now().timestamp())
    }

    pub fn is_expired_by_days_at(&self, days: u32, now: i64) -> bool {
        now >= self
            .payload
            .expires_on
            .saturating_add(i64::from(days) * SECONDS_PER_DAY)
    }

    /// Replace the payload in place.
    pub fn refresh(&mut self, payload: TokenPayload) {
        self.payload = payload;
    }
}
