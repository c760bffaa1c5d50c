//! Config file resolution and loading.
//!
//! Resolution order (first match wins):
//! 1. An explicit path (the `--config` CLI flag)
//! 2. The `GRAPH_LAYER_CONFIG` environment variable
//! 3. `./graph-layer.toml`

use std::path::{Path, PathBuf};

use crate::{ConfigError, GraphLayerConfig, Result};

/// Default config filename, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "graph-layer.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GRAPH_LAYER_CONFIG";

/// Pick the config file to load.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load and validate config from a specific file path.
pub fn load_config_file(path: &Path) -> Result<GraphLayerConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let config = GraphLayerConfig::from_toml(&contents)?;
    config.validate()?;
    Ok(config)
}
