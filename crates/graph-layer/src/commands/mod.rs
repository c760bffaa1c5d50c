//! CLI command handlers.

pub mod check_config;
pub mod cleanup;
pub mod start;

use std::path::PathBuf;

use graph_layer_config::GraphLayerConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// File the config was loaded from.
    pub config_path: PathBuf,
    /// Loaded and validated configuration.
    pub config: GraphLayerConfig,
    /// Verbose output enabled.
    pub verbose: bool,
}
