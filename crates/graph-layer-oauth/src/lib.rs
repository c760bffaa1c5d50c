//! OAuth client abstraction and application registry.
//!
//! # Components
//!
//! - [`client`]: normalized [`TokenPayload`] and the [`OAuthClient`] capability trait
//! - [`http`]: reqwest-backed client for identity-platform style authorities
//! - [`registry`]: lazily built, cached [`Application`]s keyed by application id
//! - [`mock`]: scripted client and factory for tests

pub mod client;
pub mod error;
pub mod http;
pub mod mock;
pub mod registry;

pub use client::{OAuthClient, TokenPayload};
pub use error::{OAuthError, Result};
pub use http::{HttpClientFactory, HttpOAuthClient};
pub use mock::{MockClientFactory, MockOAuthClient};
pub use registry::{Application, ApplicationRegistry, ClientFactory};
