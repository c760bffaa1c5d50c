//! Network endpoints for graph-layer.
//!
//! - [`TokenEndpoint`]: line-delimited JSON over TCP for trusted backends
//!   (login start/completion, token check, logout, profile lookup)
//! - [`ProxyEndpoint`]: HTTP proxy that attaches a valid token to each
//!   request and streams the upstream response back
//!
//! Both share one [`TokenManager`](graph_layer_token::TokenManager) and one
//! [`UpstreamClient`].

pub mod config;
pub mod error;
pub mod proxy;
pub mod token_endpoint;
pub mod upstream;
pub mod whitelist;

pub use config::{ProxyConfig, TokenEndpointConfig};
pub use error::{EndpointError, ErrorResponse, ProxyError, Result};
pub use proxy::{AccessEntry, AccessLog, MemoryAccessLog, ProxyEndpoint, TracingAccessLog};
pub use token_endpoint::{Reply, Request, TokenEndpoint};
pub use upstream::{USER_AGENT, UpstreamClient};
pub use whitelist::AddressFilter;
