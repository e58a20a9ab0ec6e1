//! Token records and expiry arithmetic

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Advisory marker of the last write to a record. Never used as a lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    #[default]
    None,
    /// Written by a full authentication
    Storing,
    /// Written by a refresh
    Updating,
}

/// Stored token pair for one vendor.
///
/// Times are seconds since the Unix epoch, TTLs are seconds. The default
/// value is the zero record returned for a vendor that has never
/// authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub issued_at: u64,
    #[serde(default)]
    pub access_token_ttl: u64,
    /// Absent when the vendor only signals refresh expiry through an error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_ttl: Option<u64>,
    #[serde(default)]
    pub status: TokenStatus,
}

impl TokenRecord {
    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    pub fn access_expires_at(&self) -> u64 {
        self.issued_at.saturating_add(self.access_token_ttl)
    }

    pub fn refresh_expires_at(&self) -> Option<u64> {
        self.refresh_token_ttl
            .map(|ttl| self.issued_at.saturating_add(ttl))
    }

    pub fn expiry(&self, now: u64, safety_gap: u64) -> Expiry {
        Expiry::compute(self, now, safety_gap)
    }
}

/// Refresh necessity of a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub access_expires_at: u64,
    pub refresh_safety_deadline: u64,
    pub refresh_expires_at: Option<u64>,
    pub is_access_expired: bool,
    pub is_refresh_expired: bool,
    pub should_refresh_now: bool,
}

impl Expiry {
    pub fn compute(record: &TokenRecord, now: u64, safety_gap: u64) -> Self {
        let access_expires_at = record.access_expires_at();
        let refresh_safety_deadline = access_expires_at.saturating_sub(safety_gap);
        let refresh_expires_at = record.refresh_expires_at();

        Self {
            access_expires_at,
            refresh_safety_deadline,
            refresh_expires_at,
            is_access_expired: now >= access_expires_at,
            is_refresh_expired: refresh_expires_at.is_some_and(|exp| now >= exp),
            should_refresh_now: now >= refresh_safety_deadline,
        }
    }
}

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
