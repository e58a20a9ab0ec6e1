//! Authenticated HTTP client for GSE APIs
//!
//! Wraps reqwest::Client with automatic token injection and refresh.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::auth::{TokenManager, Vendor};
use crate::config::Config;

/// Client for downstream calls (inspection submission, image metadata).
pub struct GseClient {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    headers: HashMap<Vendor, HeaderMap>,
}

impl GseClient {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            tokens,
            headers: HashMap::new(),
        }
    }

    /// Build a client from configuration, sharing `tokens` with other callers.
    pub fn from_config(config: &Config, tokens: Arc<TokenManager>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let mut client = Self::new(http, tokens);
        for vendor in config.configured_vendors() {
            if let Some(vendor_config) = config.vendor(vendor) {
                client = client.with_headers(vendor, &vendor_config.headers)?;
            }
        }
        Ok(client)
    }

    /// Static headers sent on every call to `vendor`.
    pub fn with_headers<'a>(
        mut self,
        vendor: Vendor,
        headers: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self> {
        let map = self.headers.entry(vendor).or_default();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name '{}' for {}", name, vendor))?;
            let mut value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header '{}'", name))?;
            value.set_sensitive(true);
            map.insert(name, value);
        }
        Ok(self)
    }

    /// Attach a fresh bearer token and the vendor's static headers.
    pub async fn authorize(
        &self,
        vendor: Vendor,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        let token = self
            .tokens
            .get_valid_access_token(vendor)
            .await
            .with_context(|| format!("No usable {} access token", vendor))?;

        let mut request = request.bearer_auth(token);
        if let Some(headers) = self.headers.get(&vendor) {
            request = request.headers(headers.clone());
        }
        Ok(request)
    }

    /// GET with vendor authorization.
    pub async fn get(&self, vendor: Vendor, url: &url::Url) -> Result<reqwest::Response> {
        tracing::debug!("{} GET {}", vendor, url);

        let request = self.authorize(vendor, self.http.get(url.as_str())).await?;
        let resp = request
            .send()
            .await
            .with_context(|| format!("{} GET {} failed", vendor, url))?;

        check_response(resp, url.as_str()).await
    }

    /// POST a JSON body with vendor authorization.
    pub async fn post_json(
        &self,
        vendor: Vendor,
        url: &url::Url,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        tracing::debug!("{} POST {}", vendor, url);

        let request = self
            .authorize(vendor, self.http.post(url.as_str()).json(body))
            .await?;
        let resp = request
            .send()
            .await
            .with_context(|| format!("{} POST {} failed", vendor, url))?;

        check_response(resp, url.as_str()).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. The vendor rejected an access token that had not \
             reached its refresh deadline; it was likely revoked on the vendor side.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
