//! Start command - runs both endpoints until a signal or a fatal error.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use graph_layer_oauth::{ApplicationRegistry, HttpClientFactory};
use graph_layer_server::{
    ProxyConfig, ProxyEndpoint, TokenEndpoint, TokenEndpointConfig, USER_AGENT, UpstreamClient,
};
use graph_layer_token::{SqliteTokenStore, TokenManager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Token endpoint port (overrides config)
    #[arg(long)]
    pub token_port: Option<u16>,

    /// Proxy endpoint port (overrides config)
    #[arg(long)]
    pub proxy_port: Option<u16>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: Context) -> Result<()> {
    let Context {
        config_path,
        config,
        verbose,
    } = ctx;

    // ── Token store and applications ────────────────────────────────────

    let store = SqliteTokenStore::open(&config.storage.path).with_context(|| {
        format!(
            "Failed to open token store at {}",
            config.storage.path.display()
        )
    })?;

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build OAuth HTTP client")?;
    let registry = Arc::new(ApplicationRegistry::new(
        config.apps.clone(),
        Arc::new(HttpClientFactory::new(http)),
    ));
    let manager = TokenManager::new(
        Arc::new(store),
        Arc::clone(&registry),
        config.token_endpoint.grace_days,
    );
    let upstream = UpstreamClient::new(&config.proxy.upstream_url, &config.proxy.profile_path)?;

    // ── Token endpoint ──────────────────────────────────────────────────

    let mut token_config = TokenEndpointConfig::from(&config.token_endpoint);
    if let Some(port) = args.token_port {
        token_config.port = port;
    }
    let mut token_endpoint = TokenEndpoint::new(token_config, manager.clone(), upstream.clone());
    let fatal = token_endpoint.fatal_signal();
    let token_addr = token_endpoint.start().await?;

    // ── Proxy endpoint ──────────────────────────────────────────────────

    let mut proxy_config = ProxyConfig::from(&config.proxy);
    if let Some(port) = args.proxy_port {
        proxy_config.port = port;
    }
    let shutdown = CancellationToken::new();
    let proxy_shutdown = shutdown.clone();
    let proxy_addr = ProxyEndpoint::new(proxy_config, manager, upstream)?
        .run_with_shutdown(async move { proxy_shutdown.cancelled().await })
        .await
        .context("Failed to start proxy endpoint")?;

    println!("graph-layer running");
    println!("  token endpoint: {}", token_addr);
    println!("  proxy endpoint: http://{}", proxy_addr);
    if verbose {
        println!("  applications:   {}", registry.app_ids().join(", "));
        println!("  config:         {}", config_path.display());
    }

    // ── Run until told to stop ──────────────────────────────────────────

    let outcome = wait_for_shutdown(&fatal, &registry, &config_path).await;

    shutdown.cancel();
    if let Err(e) = token_endpoint.stop().await {
        warn!(error = %e, "Token endpoint did not stop cleanly");
    }
    info!("graph-layer stopped");
    outcome
}

/// Reload `[apps]` from the config file into the registry.
fn reload_applications(registry: &ApplicationRegistry, config_path: &Path) {
    match graph_layer_config::load_config_file(config_path) {
        Ok(config) => {
            let count = config.apps.len();
            registry.reload(config.apps);
            info!(applications = count, "Application registry reloaded");
        }
        Err(e) => warn!(error = %e, "Config reload failed, keeping current applications"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(
    fatal: &CancellationToken,
    registry: &ApplicationRegistry,
    config_path: &Path,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => reload_applications(registry, config_path),
            _ = fatal.cancelled() => {
                error!("Fatal error reported, shutting down");
                anyhow::bail!("graph-layer stopped after a fatal error");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    fatal: &CancellationToken,
    _registry: &ApplicationRegistry,
    _config_path: &Path,
) -> Result<()> {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            Ok(())
        }
        _ = fatal.cancelled() => {
            error!("Fatal error reported, shutting down");
            anyhow::bail!("graph-layer stopped after a fatal error")
        }
    }
}
