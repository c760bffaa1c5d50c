//! Cleanup command - one maintenance pass over the token store.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use graph_layer_oauth::{ApplicationRegistry, HttpClientFactory};
use graph_layer_token::{SqliteTokenStore, TokenManager};

use super::Context;

/// Arguments for the cleanup command.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Days an expired token is kept before removal (overrides config)
    #[arg(long)]
    pub grace_days: Option<u32>,
}

/// Run the cleanup command.
pub fn run(args: CleanupArgs, ctx: &Context) -> Result<()> {
    let path = &ctx.config.storage.path;
    let store = SqliteTokenStore::open(path)
        .with_context(|| format!("Failed to open token store at {}", path.display()))?;

    let registry = ApplicationRegistry::new(
        ctx.config.apps.clone(),
        Arc::new(HttpClientFactory::new(reqwest::Client::new())),
    );
    let grace_days = args
        .grace_days
        .unwrap_or(ctx.config.token_endpoint.grace_days);
    let manager = TokenManager::new(Arc::new(store), Arc::new(registry), grace_days);

    let report = manager.cleanup()?;
    println!(
        "Scanned {} token(s), removed {} ({} expired, {} unparsable)",
        report.scanned,
        report.removed(),
        report.expired,
        report.unparsable
    );
    Ok(())
}
