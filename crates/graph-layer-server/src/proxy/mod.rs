//! HTTP proxy endpoint.
//!
//! Every request under the base path is checked against the path filter,
//! mapped to a token (anonymous header first, then session cookie) and
//! forwarded to the upstream API with that token's `Authorization` header.
//! The upstream response is streamed back unbuffered.

mod access_log;
mod filter;
mod forward;

pub use access_log::{ACCESS_TARGET, AccessEntry, AccessLog, MemoryAccessLog, TracingAccessLog};
pub use filter::PathFilter;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::any};
use graph_layer_token::TokenManager;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::upstream::UpstreamClient;
use forward::{ProxyState, forward};

/// The proxy endpoint server.
pub struct ProxyEndpoint {
    state: ProxyState,
}

impl ProxyEndpoint {
    /// Build the endpoint. Fails if a path filter pattern does not compile.
    pub fn new(
        config: ProxyConfig,
        manager: TokenManager,
        upstream: UpstreamClient,
    ) -> Result<Self, ProxyError> {
        let filter = PathFilter::new(&config.whitelist, &config.blacklist)?;
        let mut config = config;
        config.base_path = config.base_path.trim_end_matches('/').to_string();
        Ok(Self {
            state: ProxyState {
                config,
                filter,
                manager,
                upstream,
                access_log: Arc::new(TracingAccessLog),
            },
        })
    }

    /// Replace the access log sink.
    pub fn with_access_log(mut self, log: Arc<dyn AccessLog>) -> Self {
        self.state.access_log = log;
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.state.config
    }

    /// Build the axum router.
    pub fn router(self) -> Router {
        let base = self.state.config.base_path.clone();
        let (root, rest) = if base.is_empty() {
            ("/".to_string(), "/{*path}".to_string())
        } else {
            (base.clone(), format!("{}/{{*path}}", base))
        };

        Router::new()
            .route(&root, any(forward))
            .route(&rest, any(forward))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self.state))
    }

    /// Bind and serve until `shutdown` resolves, returning the bound address.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<SocketAddr> {
        let bind = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&bind).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Proxy endpoint listening");

        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown)
            .await
            {
                tracing::error!(error = %e, "Proxy endpoint stopped with error");
            }
        });
        Ok(local_addr)
    }
}
