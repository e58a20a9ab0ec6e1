//! Token lifecycle for the GSE vendor APIs
//!
//! Acquires tokens with the OAuth2 password grant, keeps them fresh with
//! the refresh grant, and persists one record per vendor.

pub mod manager;
pub mod oauth;
pub mod store;
pub mod tokens;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use manager::{RenewalPolicy, TokenManager};
pub use oauth::{IssuedTokens, TokenGrant, VendorClient};
pub use store::{FileStore, MemoryStore, TokenStore};
pub use tokens::{Clock, Expiry, SystemClock, TokenRecord, TokenStatus};

/// A government-sponsored enterprise exposing an OAuth-protected API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    FannieMae,
    FreddieMac,
}

impl Vendor {
    pub const ALL: [Vendor; 2] = [Vendor::FannieMae, Vendor::FreddieMac];

    /// Key used in config and store files
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::FannieMae => "fannie_mae",
            Vendor::FreddieMac => "freddie_mac",
        }
    }

    /// Prefix for environment overrides (`GSE_FANNIE_MAE_PASSWORD`, ...)
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Vendor::FannieMae => "GSE_FANNIE_MAE",
            Vendor::FreddieMac => "GSE_FREDDIE_MAC",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == key)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::FannieMae => f.write_str("Fannie Mae"),
            Vendor::FreddieMac => f.write_str("Freddie Mac"),
        }
    }
}
