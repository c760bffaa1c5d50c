//! Pending login sessions.
//!
//! A session lives between `auth` and its matching `callback`, or until its
//! timeout passes and the next sweep (or a late callback) removes it.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{EndpointError, Result};

/// One pending login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSession {
    pub session_id: String,
    pub app_id: String,
    /// Unix timestamp (seconds) after which the session is void.
    pub timeout: i64,
}

impl PendingSession {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.timeout
    }
}

/// In-memory table of pending sessions.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, PendingSession>>,
    lifetime: Duration,
}

impl SessionStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    /// Create a pending session for `app_id`.
    pub fn create(&self, app_id: &str) -> PendingSession {
        let session = PendingSession {
            session_id: Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            timeout: chrono::Utc::now().timestamp() + self.lifetime.as_secs() as i64,
        };
        self.sessions
            .lock()
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// Check that `session_id` is pending, unexpired and belongs to `app_id`.
    ///
    /// An expired session is removed. A mismatched application leaves the
    /// session in place.
    pub fn validate(&self, session_id: &str, app_id: &str) -> Result<PendingSession> {
        self.validate_at(session_id, app_id, chrono::Utc::now().timestamp())
    }

    pub fn validate_at(&self, session_id: &str, app_id: &str, now: i64) -> Result<PendingSession> {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get(session_id) else {
            return Err(EndpointError::Endpoint("Invalid session".to_string()));
        };
        if session.is_expired_at(now) {
            sessions.remove(session_id);
            return Err(EndpointError::Endpoint("Session has expired".to_string()));
        }
        if session.app_id != app_id {
            return Err(EndpointError::Endpoint("Invalid application".to_string()));
        }
        Ok(session.clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<PendingSession> {
        self.sessions.lock().remove(session_id)
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(chrono::Utc::now().timestamp())
    }

    pub fn sweep_expired_at(&self, now: i64) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired_at(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
