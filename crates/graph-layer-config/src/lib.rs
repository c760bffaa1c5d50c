//! Configuration system for the graph-layer token broker.
//!
//! Provides TOML-based configuration with:
//! - `[storage]` for the token database
//! - `[token_endpoint]` for the line-protocol broker
//! - `[proxy]` for the HTTP forwarding endpoint
//! - `[logging]` for the tracing subscriber
//! - `[apps.<id>]` for every registered OAuth client application
//!
//! Every section has defaults so partial files load; [`GraphLayerConfig::validate`]
//! rejects values that would make a server fail at startup.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{CONFIG_ENV, DEFAULT_CONFIG_FILE, load_config_file, resolve_config_path};
pub use error::{ConfigError, Result};
pub use types::*;
