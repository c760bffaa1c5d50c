//! graph-layer - OAuth token broker and API proxy
//!
//! Main entry point for the graph-layer CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use graph_layer_config::{CONFIG_ENV, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

mod commands;

use commands::{check_config, cleanup, start};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// graph-layer - OAuth token broker and API proxy
#[derive(Parser)]
#[command(name = "graph-layer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (default: ./graph-layer.toml)
    #[arg(short = 'f', long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the token endpoint and the proxy endpoint
    Start(start::StartArgs),

    /// Run one token cleanup pass and exit
    Cleanup(cleanup::CleanupArgs),

    /// Load and validate the config file
    CheckConfig(check_config::CheckConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

const CRATES: [&str; 5] = [
    "graph_layer",
    "graph_layer_server",
    "graph_layer_token",
    "graph_layer_oauth",
    "graph_layer_config",
];

fn directives(level: &str) -> String {
    let mut parts: Vec<String> = CRATES.iter().map(|c| format!("{}={}", c, level)).collect();
    parts.push("warn".to_string());
    parts.join(",")
}

/// Console layer plus an optional daily-rolling file layer.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)));

    let mut guard = None;
    let file_layer: Option<Box<dyn Layer<Registry> + Send + Sync>> =
        logging.directory.as_ref().map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, "graph-layer.log");
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            let filter = EnvFilter::new(directives(level));
            if logging.json {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_filter(filter)
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter)
                    .boxed()
            }
        });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    guard
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = graph_layer_config::resolve_config_path(cli.config.as_deref());
    let config = match graph_layer_config::load_config_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingConfig::default(), cli.verbose);
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to load config from {}", config_path.display())));
        }
    };

    let _guard = init_tracing(&config.logging, cli.verbose);

    let ctx = commands::Context {
        config_path,
        config,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, ctx).await,
        Commands::Cleanup(args) => cleanup::run(args, &ctx),
        Commands::CheckConfig(args) => check_config::run(args, &ctx),
    }
}
