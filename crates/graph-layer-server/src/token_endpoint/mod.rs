//! Line-delimited JSON token endpoint.
//!
//! Trusted backends connect over TCP to start logins, complete them, and
//! check, clear or inspect the resulting user tokens. See [`protocol`] for
//! the wire format.

mod connection;
pub mod protocol;
mod service;
mod sessions;

pub use connection::{IDLE_TIMEOUT, MAX_LINE_LENGTH};
pub use protocol::{NOT_UNDERSTOOD, PROTOCOL_ERROR, Reply, Request, parse_request};
pub use service::TokenService;
pub use sessions::{PendingSession, SessionStore};

use std::net::SocketAddr;
use std::sync::Arc;

use graph_layer_token::TokenManager;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TokenEndpointConfig;
use crate::error::{EndpointError, Result};
use crate::upstream::UpstreamClient;
use crate::whitelist::AddressFilter;

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// The token endpoint server.
pub struct TokenEndpoint {
    config: TokenEndpointConfig,
    service: Arc<TokenService>,
    fatal: CancellationToken,
    running: Option<Running>,
}

impl TokenEndpoint {
    pub fn new(config: TokenEndpointConfig, manager: TokenManager, upstream: UpstreamClient) -> Self {
        let sessions = SessionStore::new(config.session_timeout);
        Self {
            config,
            service: Arc::new(TokenService::new(manager, sessions, upstream)),
            fatal: CancellationToken::new(),
            running: None,
        }
    }

    /// Cancelled when a connection or the cleanup task hits a fatal error.
    pub fn fatal_signal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Bound address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn sessions(&self) -> &SessionStore {
        self.service.sessions()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Validate config, bind, and start accepting connections and cleaning up.
    ///
    /// The first cleanup pass runs immediately.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(EndpointError::Fatal(
                "TokenEndpoint is already started".to_string(),
            ));
        }

        self.config.validate()?;
        let filter = AddressFilter::parse(&self.config.whitelist)?;

        let bind = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| EndpointError::Config(format!("Failed to bind {}: {}", bind, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| EndpointError::Config(format!("Failed to read bound address: {}", e)))?;

        let shutdown = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(accept_loop(
                listener,
                filter,
                Arc::clone(&self.service),
                shutdown.clone(),
                self.fatal.clone(),
            )),
            tokio::spawn(cleanup_loop(
                Arc::clone(&self.service),
                self.config.cleanup_interval,
                shutdown.clone(),
                self.fatal.clone(),
            )),
        ];

        info!(addr = %local_addr, "Token endpoint listening");
        self.running = Some(Running {
            local_addr,
            shutdown,
            tasks,
        });
        Ok(local_addr)
    }

    /// Stop listening, close open connections and cancel cleanup.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Err(EndpointError::Fatal("TokenEndpoint is not started".to_string()));
        };

        running.shutdown.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Token endpoint task ended abnormally");
            }
        }
        info!(addr = %running.local_addr, "Token endpoint stopped");
        Ok(())
    }
}

impl Drop for TokenEndpoint {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    filter: AddressFilter,
    service: Arc<TokenService>,
    shutdown: CancellationToken,
    fatal: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        if !filter.allows(peer.ip()) {
            debug!(peer = %peer, "Dropping connection from non-whitelisted peer");
            drop(stream);
            continue;
        }

        tokio::spawn(connection::serve_connection(
            stream,
            peer,
            Arc::clone(&service),
            shutdown.child_token(),
            fatal.clone(),
        ));
    }
}

async fn cleanup_loop(
    service: Arc<TokenService>,
    every: std::time::Duration,
    shutdown: CancellationToken,
    fatal: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let manager = service.manager().clone();
        let report = tokio::task::spawn_blocking(move || manager.cleanup()).await;
        match report {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.is_fatal() => {
                error!(error = %e, "Token cleanup failed");
                fatal.cancel();
                break;
            }
            Ok(Err(e)) => warn!(error = %e, "Token cleanup failed"),
            Err(e) => warn!(error = %e, "Token cleanup task panicked"),
        }

        let swept = service.sessions().sweep_expired();
        if swept > 0 {
            debug!(swept, "Expired login sessions removed");
        }
    }
}
