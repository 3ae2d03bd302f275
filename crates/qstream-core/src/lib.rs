//! Core domain types for the qstream quote client.
//!
//! This crate provides the pieces shared by the transport and application layers:
//! - `Credentials`: API key, base64 secret and passphrase (secret is redacted and zeroized)
//! - `sign`: HMAC-SHA256 request signature used by the auth handshake
//! - `PriceUpdate`, `Subscription`, `PairKey`: quote feed domain types

pub mod credentials;
pub mod error;
pub mod signer;
pub mod types;

pub use credentials::Credentials;
pub use error::{CoreError, CoreResult};
pub use signer::{sign, unix_timestamp, SIGN_METHOD};
pub use types::{PairKey, PriceUpdate, QuantityLevels, Subscription};
