//! Hands out fresh access tokens, refreshing or re-authenticating as needed

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use super::store::{FileStore, MemoryStore, TokenStore};
use super::tokens::{Clock, Expiry, SystemClock, TokenRecord, TokenStatus};
use super::{TokenGrant, Vendor, VendorClient};
use crate::config::{Config, RefreshRotation, StoreBackend, VendorConfig};
use crate::error::{GrantError, TokenError};

/// Per-vendor renewal settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// Seconds before expiry at which a token counts as stale
    pub safety_gap: u64,
    pub rotation: RefreshRotation,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            safety_gap: 60,
            rotation: RefreshRotation::Reuse,
        }
    }
}

impl From<&VendorConfig> for RenewalPolicy {
    fn from(config: &VendorConfig) -> Self {
        Self {
            safety_gap: config.safety_gap_secs,
            rotation: config.refresh_rotation,
        }
    }
}

struct VendorSlot {
    grant: Arc<dyn TokenGrant>,
    policy: RenewalPolicy,
    /// Serializes renewals so concurrent callers share one grant call
    renewal: tokio::sync::Mutex<()>,
}

/// Shared token lifecycle manager, one per process.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    vendors: HashMap<Vendor, VendorSlot>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            vendors: HashMap::new(),
        }
    }

    pub fn with_vendor(
        mut self,
        vendor: Vendor,
        grant: Arc<dyn TokenGrant>,
        policy: RenewalPolicy,
    ) -> Self {
        self.vendors.insert(
            vendor,
            VendorSlot {
                grant,
                policy,
                renewal: tokio::sync::Mutex::new(()),
            },
        );
        self
    }

    /// Wire the configured store, the system clock and one OAuth client
    /// per configured vendor.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn TokenStore> = match config.store.backend {
            StoreBackend::File => Arc::new(FileStore::new(config.store_path()?)),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };

        let mut manager = Self::new(store, Arc::new(SystemClock));
        for vendor in config.configured_vendors() {
            let Some(vendor_config) = config.vendor(vendor) else {
                continue;
            };
            let client = VendorClient::new(vendor, vendor_config, config.http.timeout())?;
            manager = manager.with_vendor(vendor, Arc::new(client), vendor_config.into());
        }
        Ok(manager)
    }

    pub fn vendors(&self) -> Vec<Vendor> {
        let mut vendors: Vec<Vendor> = self.vendors.keys().copied().collect();
        vendors.sort();
        vendors
    }

    fn slot(&self, vendor: Vendor) -> Result<&VendorSlot, TokenError> {
        self.vendors
            .get(&vendor)
            .ok_or(TokenError::NotConfigured(vendor))
    }

    /// Current record and its expiry flags. Read-only.
    pub async fn inspect(&self, vendor: Vendor) -> Result<(TokenRecord, Expiry), TokenError> {
        let slot = self.slot(vendor)?;
        let record = self.store.load(vendor).await;
        let expiry = record.expiry(self.clock.now(), slot.policy.safety_gap);
        Ok((record, expiry))
    }

    /// Access token that stays valid for at least the vendor's safety gap.
    ///
    /// A fresh stored token is returned without any network call or store
    /// write. Otherwise the token is refreshed, falling back to full
    /// authentication only when the vendor rejects the refresh token itself.
    pub async fn get_valid_access_token(&self, vendor: Vendor) -> Result<String, TokenError> {
        let slot = self.slot(vendor)?;

        let record = self.store.load(vendor).await;
        if let Some(token) = self.usable_token(vendor, slot, &record) {
            return Ok(token);
        }

        let _renewal = slot.renewal.lock().await;

        // Another caller may have renewed while we waited.
        let record = self.store.load(vendor).await;
        if let Some(token) = self.usable_token(vendor, slot, &record) {
            return Ok(token);
        }

        let renewed = self.renew(vendor, slot, record).await?;
        Ok(renewed.access_token)
    }

    /// Refresh now regardless of freshness, with the usual invalid-grant fallback.
    pub async fn force_refresh(&self, vendor: Vendor) -> Result<TokenRecord, TokenError> {
        let slot = self.slot(vendor)?;
        let _renewal = slot.renewal.lock().await;
        let record = self.store.load(vendor).await;
        self.renew(vendor, slot, record).await
    }

    /// Full re-authentication regardless of the stored state.
    pub async fn force_authenticate(&self, vendor: Vendor) -> Result<TokenRecord, TokenError> {
        let slot = self.slot(vendor)?;
        let _renewal = slot.renewal.lock().await;
        self.authenticate(vendor, slot).await
    }

    fn usable_token(
        &self,
        vendor: Vendor,
        slot: &VendorSlot,
        record: &TokenRecord,
    ) -> Option<String> {
        let expiry = record.expiry(self.clock.now(), slot.policy.safety_gap);
        if record.has_access_token() && !expiry.should_refresh_now {
            tracing::debug!("Using cached {} token", vendor);
            Some(record.access_token.clone())
        } else {
            None
        }
    }

    async fn renew(
        &self,
        vendor: Vendor,
        slot: &VendorSlot,
        current: TokenRecord,
    ) -> Result<TokenRecord, TokenError> {
        let now = self.clock.now();
        let expiry = current.expiry(now, slot.policy.safety_gap);

        if !current.has_refresh_token() {
            tracing::info!("No {} refresh token, authenticating", vendor);
            return self.authenticate(vendor, slot).await;
        }
        if expiry.is_refresh_expired {
            tracing::info!("{} refresh token past its deadline, authenticating", vendor);
            return self.authenticate(vendor, slot).await;
        }

        tracing::info!("Refreshing {} access token", vendor);
        match slot.grant.refresh(&current.refresh_token).await {
            Ok(issued) => {
                let (refresh_token, refresh_token_ttl) = match slot.policy.rotation {
                    RefreshRotation::Reuse => {
                        if issued.refresh_token.is_some() {
                            tracing::warn!(
                                "{} returned a new refresh token but rotation is off, keeping the stored one",
                                vendor
                            );
                        }
                        (
                            current.refresh_token.clone(),
                            current
                                .refresh_expires_at()
                                .map(|deadline| deadline.saturating_sub(now)),
                        )
                    }
                    RefreshRotation::Rotate => match issued.refresh_token {
                        Some(rotated) => (rotated, issued.refresh_ttl),
                        None => (
                            current.refresh_token.clone(),
                            current
                                .refresh_expires_at()
                                .map(|deadline| deadline.saturating_sub(now)),
                        ),
                    },
                };

                let record = TokenRecord {
                    access_token: issued.access_token,
                    refresh_token,
                    issued_at: now,
                    access_token_ttl: issued.access_ttl,
                    refresh_token_ttl,
                    status: TokenStatus::Updating,
                };
                self.persist(vendor, record).await
            }
            Err(GrantError::InvalidGrant { code }) => {
                tracing::warn!(
                    "{} rejected the refresh token ({}), re-authenticating",
                    vendor,
                    code
                );
                self.authenticate(vendor, slot).await
            }
            Err(source) => {
                tracing::warn!("{} token refresh failed: {}", vendor, source);
                Err(TokenError::RefreshFailed { vendor, source })
            }
        }
    }

    async fn authenticate(
        &self,
        vendor: Vendor,
        slot: &VendorSlot,
    ) -> Result<TokenRecord, TokenError> {
        let now = self.clock.now();
        let issued = slot.grant.authenticate().await.map_err(|source| {
            tracing::warn!("{} authentication failed: {}", vendor, source);
            TokenError::AuthenticationFailed { vendor, source }
        })?;

        let record = TokenRecord {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token.unwrap_or_default(),
            issued_at: now,
            access_token_ttl: issued.access_ttl,
            refresh_token_ttl: issued.refresh_ttl,
            status: TokenStatus::Storing,
        };
        tracing::info!("Authenticated with {}", vendor);
        self.persist(vendor, record).await
    }

    async fn persist(&self, vendor: Vendor, record: TokenRecord) -> Result<TokenRecord, TokenError> {
        self.store.save(vendor, record).await.map_err(|source| {
            tracing::error!("Failed to persist {} token: {}", vendor, source);
            TokenError::Persistence { vendor, source }
        })
    }
}
