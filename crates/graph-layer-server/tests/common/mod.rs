//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use graph_layer_oauth::mock::mock_app_config;
use graph_layer_oauth::{ApplicationRegistry, MockClientFactory, MockOAuthClient, TokenPayload};
use graph_layer_token::{SqliteTokenStore, TokenManager};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

/// Token manager over an in-memory store and mock OAuth clients.
pub struct Harness {
    pub manager: TokenManager,
    pub factory: Arc<MockClientFactory>,
}

impl Harness {
    /// `apps` are `(app_id, has_anonymous_credentials)` pairs.
    pub fn new(apps: &[(&str, bool)]) -> Self {
        let configs: HashMap<_, _> = apps
            .iter()
            .map(|(id, anonymous)| (id.to_string(), mock_app_config(*anonymous)))
            .collect();
        let factory = Arc::new(MockClientFactory::new());
        let registry = Arc::new(ApplicationRegistry::new(configs, factory.clone()));
        let store = Arc::new(SqliteTokenStore::open_in_memory().expect("in-memory store"));
        Self {
            manager: TokenManager::new(store, registry, 15),
            factory,
        }
    }

    pub fn client(&self, app_id: &str) -> Arc<MockOAuthClient> {
        self.factory.client(app_id)
    }

    /// Store a user token expiring `expires_in` seconds from now.
    pub fn seed_user_token(&self, token_id: &str, app_id: &str, expires_in: i64, refresh: bool) {
        let payload = payload(
            &format!("seeded-{}", token_id),
            expires_in,
            refresh.then(|| format!("seeded-refresh-{}", token_id)),
        );
        self.manager
            .set(token_id, app_id, true, &payload)
            .expect("seed token");
    }
}

pub fn payload(access_token: &str, expires_in: i64, refresh_token: Option<String>) -> TokenPayload {
    TokenPayload {
        access_token: access_token.to_string(),
        refresh_token,
        expires_on: chrono::Utc::now().timestamp() + expires_in,
        scopes: vec!["User.Read".to_string()],
        id_token: None,
        token_type: "Bearer".to_string(),
    }
}

/// Find an available port by binding to port 0.
pub async fn find_available_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Wait until something accepts TCP connections on `addr`.
pub async fn wait_for_server(addr: SocketAddr, max_wait: Duration) -> Result<()> {
    let start = std::time::Instant::now();
    while start.elapsed() < max_wait {
        if TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("server at {} did not come up within {:?}", addr, max_wait)
}

/// Client side of the token endpoint line protocol.
pub struct LineClient {
    lines: Framed<TcpStream, LinesCodec>,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            lines: Framed::new(stream, LinesCodec::new()),
        })
    }

    pub async fn send_raw(&mut self, line: &str) -> Result<()> {
        self.lines.send(line).await?;
        Ok(())
    }

    /// Next reply, or `None` if the server closed the connection.
    pub async fn recv(&mut self) -> Result<Option<serde_json::Value>> {
        match timeout(Duration::from_secs(5), self.lines.next())
            .await
            .context("timed out waiting for reply")?
        {
            Some(line) => Ok(Some(serde_json::from_str(&line?)?)),
            None => Ok(None),
        }
    }

    pub async fn request(&mut self, message: serde_json::Value) -> Result<serde_json::Value> {
        self.send_raw(&message.to_string()).await?;
        self.recv().await?.context("connection closed before reply")
    }
}
