//! Configuration: vendor credentials, HTTP and store settings

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Vendor;

/// How client credentials reach the token endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    /// `Authorization: Basic base64(client_id:client_secret)`
    #[default]
    Basic,
    /// `client_id` / `client_secret` form fields
    RequestBody,
}

/// What a successful refresh does to the stored refresh token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshRotation {
    /// Keep the stored refresh token and its original deadline
    #[default]
    Reuse,
    /// Replace it with the one the vendor returns
    Rotate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-call timeout for token endpoint and downstream requests
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Token file, defaults to `tokens.toml` in the data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Connection settings for one vendor's token endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub auth_style: AuthStyle,
    #[serde(default)]
    pub refresh_rotation: RefreshRotation,
    /// Refresh this long before the access token actually expires
    #[serde(default = "default_safety_gap_secs")]
    pub safety_gap_secs: u64,
    /// Access token lifetime assumed when the vendor omits `expires_in`
    #[serde(default = "default_access_ttl_fallback_secs")]
    pub access_ttl_fallback_secs: u64,
    /// Error codes meaning the refresh token is dead
    #[serde(default = "default_invalid_grant_codes")]
    pub invalid_grant_codes: Vec<String>,
    /// Static headers added to every downstream API call
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

// Hand-written so credentials never end up in logs.
impl fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &"***")
            .field("scopes", &self.scopes)
            .field("auth_style", &self.auth_style)
            .field("refresh_rotation", &self.refresh_rotation)
            .field("safety_gap_secs", &self.safety_gap_secs)
            .field("access_ttl_fallback_secs", &self.access_ttl_fallback_secs)
            .field("invalid_grant_codes", &self.invalid_grant_codes)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Keyed by vendor (`fannie_mae`, `freddie_mac`)
    #[serde(default)]
    pub vendors: BTreeMap<String, VendorConfig>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_safety_gap_secs() -> u64 {
    60
}

fn default_access_ttl_fallback_secs() -> u64 {
    3600
}

fn default_invalid_grant_codes() -> Vec<String> {
    vec!["invalid_grant".to_string()]
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "gse-tokens", "gse-tokens")
            .context("Could not determine config directory")
    }

    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Token file used when `store.path` is not set
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("tokens.toml")),
        }
    }

    /// Load configuration from disk, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        for key in config.vendors.keys() {
            if Vendor::from_key(key).is_none() {
                bail!("Unknown vendor '{}' (expected fannie_mae or freddie_mac)", key);
            }
        }
        Ok(config)
    }

    /// Replace secrets with `GSE_<VENDOR>_CLIENT_SECRET` / `GSE_<VENDOR>_PASSWORD`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for vendor in Vendor::ALL {
            let Some(entry) = self.vendors.get_mut(vendor.as_str()) else {
                continue;
            };
            if let Some(secret) = lookup(&format!("{}_CLIENT_SECRET", vendor.env_prefix())) {
                entry.client_secret = Some(secret);
            }
            if let Some(password) = lookup(&format!("{}_PASSWORD", vendor.env_prefix())) {
                entry.password = password;
            }
        }
    }

    pub fn vendor(&self, vendor: Vendor) -> Option<&VendorConfig> {
        self.vendors.get(vendor.as_str())
    }

    /// Configured vendors in a stable order
    pub fn configured_vendors(&self) -> Vec<Vendor> {
        Vendor::ALL
            .into_iter()
            .filter(|v| self.vendors.contains_key(v.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[http]
timeout_secs = 10

[store]
backend = "memory"

[vendors.fannie_mae]
token_url = "https://auth.fanniemae.example/oauth2/token"
client_id = "fm-client"
client_secret = "fm-secret"
username = "inspector"
password = "hunter2"

[vendors.fannie_mae.headers]
"x-api-key" = "abc"

[vendors.freddie_mac]
token_url = "https://auth.freddiemac.example/token"
client_id = "fre-client"
username = "inspector"
auth_style = "request_body"
refresh_rotation = "rotate"
safety_gap_secs = 120
invalid_grant_codes = ["invalid_grant", "REFRESH_TOKEN_EXPIRED"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.http.timeout(), Duration::from_secs(10));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(
            config.configured_vendors(),
            vec![Vendor::FannieMae, Vendor::FreddieMac]
        );

        let fannie = config.vendor(Vendor::FannieMae).unwrap();
        assert_eq!(fannie.auth_style, AuthStyle::Basic);
        assert_eq!(fannie.refresh_rotation, RefreshRotation::Reuse);
        assert_eq!(fannie.safety_gap_secs, 60);
        assert_eq!(fannie.access_ttl_fallback_secs, 3600);
        assert_eq!(fannie.invalid_grant_codes, vec!["invalid_grant"]);
        assert_eq!(fannie.headers.get("x-api-key").map(String::as_str), Some("abc"));

        let freddie = config.vendor(Vendor::FreddieMac).unwrap();
        assert_eq!(freddie.auth_style, AuthStyle::RequestBody);
        assert_eq!(freddie.refresh_rotation, RefreshRotation::Rotate);
        assert_eq!(freddie.safety_gap_secs, 120);
        assert_eq!(freddie.client_secret, None);
        assert_eq!(freddie.invalid_grant_codes.len(), 2);
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert!(config.configured_vendors().is_empty());
    }

    #[test]
    fn test_unknown_vendor_rejected() {
        let err = Config::parse(
            r#"
[vendors.ginnie_mae]
token_url = "https://example.com"
client_id = "x"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ginnie_mae"));
    }

    #[test]
    fn test_env_overrides_secrets() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.apply_overrides(|key| match key {
            "GSE_FREDDIE_MAC_CLIENT_SECRET" => Some("from-env".to_string()),
            "GSE_FANNIE_MAE_PASSWORD" => Some("env-pass".to_string()),
            _ => None,
        });

        let freddie = config.vendor(Vendor::FreddieMac).unwrap();
        assert_eq!(freddie.client_secret.as_deref(), Some("from-env"));
        let fannie = config.vendor(Vendor::FannieMae).unwrap();
        assert_eq!(fannie.password, "env-pass");
        assert_eq!(fannie.client_secret.as_deref(), Some("fm-secret"));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = Config::parse(SAMPLE).unwrap();
        let dump = format!("{:?}", config.vendor(Vendor::FannieMae).unwrap());
        assert!(!dump.contains("hunter2"));
        assert!(!dump.contains("fm-secret"));
        assert!(!dump.contains("\"abc\""));
    }

    #[test]
    fn test_missing_file_yields_default() {
        let path = std::env::temp_dir().join(format!("gse-config-{}.toml", uuid::Uuid::new_v4()));
        let config = Config::load(Some(&path)).unwrap();
        assert!(config.vendors.is_empty());
    }

    #[test]
    fn test_explicit_store_path() {
        let config = Config::parse(
            r#"
[store]
path = "/var/lib/gse/tokens.toml"
"#,
        )
        .unwrap();
        assert_eq!(
            config.store_path().unwrap(),
            PathBuf::from("/var/lib/gse/tokens.toml")
        );
    }
}
