//! Runtime configuration for the two endpoints.

use std::time::Duration;

use graph_layer_config::{ProxySection, TokenEndpointSection};

use crate::error::{EndpointError, Result};

/// Default seconds between cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Default lifetime of a pending login session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default max request body forwarded by the proxy (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Token endpoint configuration.
#[derive(Debug, Clone)]
pub struct TokenEndpointConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Peer addresses or CIDR ranges allowed to connect. Empty allows every peer.
    pub whitelist: Vec<String>,
    /// Interval between cleanup passes. The first pass runs at startup.
    pub cleanup_interval: Duration,
    /// Lifetime of a pending login session.
    pub session_timeout: Duration,
}

impl Default for TokenEndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            whitelist: Vec::new(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl TokenEndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the peer whitelist.
    pub fn with_whitelist(mut self, whitelist: Vec<String>) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Set the cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the pending session lifetime.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Check host, port and cleanup interval.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(EndpointError::Config(format!(
                "Invalid TCP config for token endpoint: '{}:{}'",
                self.host, self.port
            )));
        }
        if self.cleanup_interval < Duration::from_secs(1) {
            return Err(EndpointError::Config(format!(
                "Cleanup interval '{}' is invalid",
                self.cleanup_interval.as_secs()
            )));
        }
        Ok(())
    }
}

impl From<&TokenEndpointSection> for TokenEndpointConfig {
    fn from(section: &TokenEndpointSection) -> Self {
        Self {
            host: section.host.clone(),
            port: section.port,
            whitelist: section.whitelist.clone(),
            cleanup_interval: Duration::from_secs(section.cleanup_interval),
            session_timeout: Duration::from_secs(section.session_timeout),
        }
    }
}

/// Proxy endpoint configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path prefix the proxy is mounted under. Empty mounts at root.
    pub base_path: String,
    /// Cookie carrying a user token id.
    pub cookie_name: String,
    /// Header carrying an application id for anonymous access.
    pub anonymous_header: String,
    /// Glob patterns; when non-empty only matching paths are proxied.
    pub whitelist: Vec<String>,
    /// Glob patterns never proxied.
    pub blacklist: Vec<String>,
    /// Maximum request body forwarded upstream.
    pub max_body_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_path: String::new(),
            cookie_name: "graph_layer_session".to_string(),
            anonymous_header: "X-Graph-Layer-App".to_string(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the mount prefix.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Set the session cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set the anonymous identity header name.
    pub fn with_anonymous_header(mut self, name: impl Into<String>) -> Self {
        self.anonymous_header = name.into();
        self
    }

    /// Set the path whitelist.
    pub fn with_whitelist(mut self, patterns: Vec<String>) -> Self {
        self.whitelist = patterns;
        self
    }

    /// Set the path blacklist.
    pub fn with_blacklist(mut self, patterns: Vec<String>) -> Self {
        self.blacklist = patterns;
        self
    }

    /// Set the maximum forwarded body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }
}

impl From<&ProxySection> for ProxyConfig {
    fn from(section: &ProxySection) -> Self {
        Self {
            host: section.host.clone(),
            port: section.port,
            base_path: section.base_path.clone(),
            cookie_name: section.cookie_name.clone(),
            anonymous_header: section.anonymous_header.clone(),
            whitelist: section.whitelist.clone(),
            blacklist: section.blacklist.clone(),
            max_body_size: section.max_body_size,
        }
    }
}
