//! OAuth token lifecycle manager for the GSE property-data APIs.
//!
//! Keeps one access/refresh token pair per vendor in a shared store and
//! hands out access tokens that are guaranteed fresh, refreshing or
//! re-authenticating against the vendor's token endpoint when needed.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

pub use api::client::GseClient;
pub use auth::{TokenManager, TokenRecord, TokenStore, Vendor};
pub use config::Config;
pub use error::{GrantError, StoreError, TokenError};
