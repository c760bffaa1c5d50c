//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [storage]                # token database
//! [token_endpoint]         # line-protocol broker
//! [proxy]                  # HTTP forwarding endpoint
//! [logging]                # tracing subscriber
//! [apps.portal]            # one table per registered application
//! [apps.portal.anonymous]  # optional service identity for that application
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default token database file.
pub const DEFAULT_STORAGE_PATH: &str = "graph-layer.db";

/// Default token endpoint port.
pub const DEFAULT_TOKEN_ENDPOINT_PORT: u16 = 7000;

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Default seconds between token cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Default days an expired token is retained before cleanup purges it.
pub const DEFAULT_GRACE_DAYS: u32 = 15;

/// Default lifetime of a pending login session in seconds.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;

/// Default authority host for applications.
pub const DEFAULT_CLOUD_URL: &str = "https://login.microsoftonline.com";

/// Default upstream API.
pub const DEFAULT_UPSTREAM_URL: &str = "https://graph.microsoft.com/v1.0";

/// Default maximum request body forwarded by the proxy (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphLayerConfig {
    /// Token database settings.
    pub storage: StorageConfig,

    /// Token endpoint (line protocol) settings.
    pub token_endpoint: TokenEndpointSection,

    /// Proxy endpoint settings.
    pub proxy: ProxySection,

    /// Logging settings.
    pub logging: LoggingConfig,

    /// Registered applications keyed by application id.
    pub apps: HashMap<String, ApplicationConfig>,
}

impl GraphLayerConfig {
    /// Create a config with every section at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Look up an application by id.
    pub fn app(&self, app_id: &str) -> Option<&ApplicationConfig> {
        self.apps.get(app_id)
    }

    /// Sorted application ids.
    pub fn app_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.apps.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Check every section for values that would fail at startup.
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.token_endpoint.validate()?;
        self.proxy.validate()?;
        for (id, app) in &self.apps {
            app.validate(id)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Token database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::missing("path", "[storage]"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Endpoint Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The `[token_endpoint]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenEndpointSection {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Peer addresses or CIDR ranges allowed to connect. Empty allows everyone.
    pub whitelist: Vec<String>,
    /// Seconds between cleanup passes.
    pub cleanup_interval: u64,
    /// Days past expiry a token survives cleanup.
    pub grace_days: u32,
    /// Seconds a pending login session stays valid.
    pub session_timeout: u64,
}

impl Default for TokenEndpointSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TOKEN_ENDPOINT_PORT,
            whitelist: Vec::new(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL_SECS,
            grace_days: DEFAULT_GRACE_DAYS,
            session_timeout: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

impl TokenEndpointSection {
    fn validate(&self) -> Result<()> {
        const CTX: &str = "[token_endpoint]";
        if self.host.trim().is_empty() {
            return Err(ConfigError::missing("host", CTX));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", CTX, "must be between 1 and 65535"));
        }
        if self.cleanup_interval < 1 {
            return Err(ConfigError::invalid(
                "cleanup_interval",
                CTX,
                "must be at least 1 second",
            ));
        }
        if self.session_timeout < 1 {
            return Err(ConfigError::invalid(
                "session_timeout",
                CTX,
                "must be at least 1 second",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The `[proxy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path prefix the proxy is mounted under (e.g. `/api`). Empty mounts at root.
    pub base_path: String,
    /// Base URL of the upstream API.
    pub upstream_url: String,
    /// Upstream path used for user profile lookups.
    pub profile_path: String,
    /// Cookie carrying a user token id.
    pub cookie_name: String,
    /// Header carrying an application id for anonymous access.
    pub anonymous_header: String,
    /// Glob patterns; when non-empty, only matching paths are proxied.
    pub whitelist: Vec<String>,
    /// Glob patterns that are never proxied.
    pub blacklist: Vec<String>,
    /// Maximum request body forwarded upstream, in bytes.
    pub max_body_size: usize,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PROXY_PORT,
            base_path: String::new(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            profile_path: "/me".to_string(),
            cookie_name: "graph_layer_session".to_string(),
            anonymous_header: "X-Graph-Layer-App".to_string(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ProxySection {
    fn validate(&self) -> Result<()> {
        const CTX: &str = "[proxy]";
        if self.host.trim().is_empty() {
            return Err(ConfigError::missing("host", CTX));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", CTX, "must be between 1 and 65535"));
        }
        if !self.upstream_url.starts_with("http://") && !self.upstream_url.starts_with("https://")
        {
            return Err(ConfigError::invalid(
                "upstream_url",
                CTX,
                "must be an http(s) URL",
            ));
        }
        if !self.base_path.is_empty()
            && (!self.base_path.starts_with('/') || self.base_path.ends_with('/'))
        {
            return Err(ConfigError::invalid(
                "base_path",
                CTX,
                "must start with '/' and not end with '/'",
            ));
        }
        if self.cookie_name.trim().is_empty() {
            return Err(ConfigError::missing("cookie_name", CTX));
        }
        if self.anonymous_header.trim().is_empty() {
            return Err(ConfigError::missing("anonymous_header", CTX));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console filter level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Directory for daily rolling JSON log files. `None` disables file logging.
    pub directory: Option<PathBuf>,
    /// Write the file log as JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One registered OAuth client application.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret (confidential clients).
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authority host, e.g. `https://login.microsoftonline.com`.
    #[serde(default = "default_cloud_url")]
    pub cloud_url: String,
    /// Tenant id or domain.
    pub tenant_id: String,
    /// Scopes requested for delegated and anonymous tokens.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    /// Where the provider sends the browser after logout.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
    /// Service identity used for anonymous access.
    #[serde(default)]
    pub anonymous: Option<AnonymousCredentials>,
}

fn default_cloud_url() -> String {
    DEFAULT_CLOUD_URL.to_string()
}

impl ApplicationConfig {
    /// The `<cloud_url>/<tenant_id>` authority URL.
    pub fn authority(&self) -> String {
        format!("{}/{}", self.cloud_url.trim_end_matches('/'), self.tenant_id)
    }

    fn validate(&self, app_id: &str) -> Result<()> {
        let ctx = format!("[apps.{}]", app_id);
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::missing("client_id", ctx));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(ConfigError::missing("tenant_id", ctx));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::missing("redirect_uri", ctx));
        }
        if let Some(anon) = &self.anonymous
            && anon.username.trim().is_empty()
        {
            return Err(ConfigError::missing("username", format!("{}.anonymous", ctx)));
        }
        Ok(())
    }
}

impl fmt::Debug for ApplicationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("cloud_url", &self.cloud_url)
            .field("tenant_id", &self.tenant_id)
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .field("post_logout_redirect_uri", &self.post_logout_redirect_uri)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Username/password pair for an application's anonymous identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct AnonymousCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AnonymousCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnonymousCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[storage]
path = "/var/lib/graph-layer/tokens.db"

[token_endpoint]
host = "0.0.0.0"
port = 7100
whitelist = ["127.0.0.1", "10.0.0.0/8"]
cleanup_interval = 60
grace_days = 3

[proxy]
port = 9000
base_path = "/api"
blacklist = ["/admin/*"]

[logging]
level = "debug"
directory = "logs"

[apps.portal]
client_id = "client-1"
client_secret = "s3cret"
tenant_id = "contoso"
scopes = ["User.Read"]
redirect_uri = "https://portal.example.com/callback"

[apps.portal.anonymous]
username = "svc@contoso.com"
password = "hunter2"

[apps.kiosk]
client_id = "client-2"
tenant_id = "contoso"
redirect_uri = "https://kiosk.example.com/callback"
"#;

    #[test]
    fn test_empty_config() {
        let config = GraphLayerConfig::from_toml("").unwrap();
        assert!(config.apps.is_empty());
        assert_eq!(config.token_endpoint.port, DEFAULT_TOKEN_ENDPOINT_PORT);
        assert_eq!(config.token_endpoint.grace_days, DEFAULT_GRACE_DAYS);
        assert_eq!(config.proxy.max_body_size, DEFAULT_MAX_BODY_SIZE);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full() {
        let config = GraphLayerConfig::from_toml(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.token_endpoint.whitelist.len(), 2);
        assert_eq!(config.token_endpoint.cleanup_interval, 60);
        assert_eq!(config.proxy.base_path, "/api");
        // Unset keys keep their defaults.
        assert_eq!(config.proxy.cookie_name, "graph_layer_session");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.app_ids(), vec!["kiosk", "portal"]);

        let portal = config.app("portal").unwrap();
        assert_eq!(portal.cloud_url, DEFAULT_CLOUD_URL);
        assert_eq!(portal.authority(), "https://login.microsoftonline.com/contoso");
        assert_eq!(portal.anonymous.as_ref().unwrap().username, "svc@contoso.com");
        assert!(config.app("kiosk").unwrap().anonymous.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = GraphLayerConfig::from_toml(FULL).unwrap();
        let rendered = format!("{:?}", config.app("portal").unwrap());
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("svc@contoso.com"));
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = GraphLayerConfig::from_toml("[token_endpoint]\nport = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "port"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_cleanup_interval() {
        let config =
            GraphLayerConfig::from_toml("[token_endpoint]\ncleanup_interval = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_base_path() {
        let config = GraphLayerConfig::from_toml("[proxy]\nbase_path = \"api/\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_app_without_client_id() {
        let toml = r#"
[apps.broken]
client_id = ""
tenant_id = "t"
redirect_uri = "https://x"
"#;
        let config = GraphLayerConfig::from_toml(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[apps.broken]"));
    }

    #[test]
    fn test_app_missing_required_key_fails_parse() {
        let toml = r#"
[apps.broken]
client_id = "c"
"#;
        assert!(matches!(
            GraphLayerConfig::from_toml(toml),
            Err(ConfigError::Parse(_))
        ));
    }
}
