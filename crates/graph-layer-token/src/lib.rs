//! Token broker core.
//!
//! - [`Token`] wraps one persisted record with expiry tests and in-place refresh
//! - [`SqliteTokenStore`] persists records in the `token` table
//! - [`SingleFlight`] de-duplicates concurrent upstream grants per key
//! - [`TokenManager`] answers "give me a currently valid token"

pub mod error;
pub mod flight;
pub mod manager;
pub mod store;
pub mod token;

pub use error::{Result, TokenError};
pub use flight::{FlightKey, SingleFlight};
pub use manager::{CleanupReport, Freshness, TokenManager, anonymous_token_id, generate_token_id};
pub use store::{SqliteTokenStore, TokenRecord, TokenTx};
pub use token::Token;
