//! OAuth2 password and refresh grants against a vendor token endpoint

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    helpers, AccessToken, AuthType, AuthUrl, Client, ClientId, ClientSecret, HttpRequest,
    HttpResponse, RefreshToken, RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername,
    Scope, StandardRevocableToken, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};

use super::Vendor;
use crate::config::{AuthStyle, VendorConfig};
use crate::error::GrantError;

/// Tokens handed back by a successful grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    /// `None` when the vendor keeps the old refresh token valid
    pub refresh_token: Option<String>,
    pub access_ttl: u64,
    pub refresh_ttl: Option<u64>,
}

/// Token endpoint operations for one vendor.
#[async_trait]
pub trait TokenGrant: Send + Sync {
    /// Full credential-based authentication. No retry.
    async fn authenticate(&self) -> Result<IssuedTokens, GrantError>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, GrantError>;
}

/// Seconds sent either as a JSON number or as a numeric string.
fn lenient_secs(value: Option<&serde_json::Value>) -> Option<u64> {
    match value? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bearer() -> BasicTokenType {
    BasicTokenType::Bearer
}

/// Token endpoint response.
///
/// Vendors disagree on how lifetimes are encoded and some omit
/// `token_type`, so this is looser than RFC 6749 section 5.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorTokenResponse {
    access_token: AccessToken,
    #[serde(
        default = "bearer",
        deserialize_with = "helpers::deserialize_untagged_enum_case_insensitive"
    )]
    token_type: BasicTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token_expires_in: Option<serde_json::Value>,
    #[serde(rename = "scope")]
    #[serde(deserialize_with = "helpers::deserialize_space_delimited_vec")]
    #[serde(serialize_with = "helpers::serialize_space_delimited_vec")]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    scopes: Option<Vec<Scope>>,
}

impl VendorTokenResponse {
    pub fn access_ttl(&self) -> Option<u64> {
        lenient_secs(self.expires_in.as_ref())
    }

    pub fn refresh_ttl(&self) -> Option<u64> {
        lenient_secs(self.refresh_token_expires_in.as_ref())
    }
}

impl TokenResponse<BasicTokenType> for VendorTokenResponse {
    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &BasicTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        self.access_ttl().map(Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<Scope>> {
        self.scopes.as_ref()
    }
}

type VendorOAuthClient = Client<
    BasicErrorResponse,
    VendorTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Error bodies that do not follow RFC 6749 section 5.2
#[derive(Debug, Deserialize)]
struct VendorErrorBody {
    #[serde(alias = "errorCode", alias = "error_code", alias = "code")]
    error: Option<String>,
    #[serde(alias = "errorDescription", alias = "message")]
    error_description: Option<String>,
}

/// Extract `(code, description)` from a non-standard error body.
pub(crate) fn parse_error_body(body: &[u8]) -> Option<(String, String)> {
    let parsed: VendorErrorBody = serde_json::from_slice(body).ok()?;
    let code = parsed.error?;
    Some((code, parsed.error_description.unwrap_or_default()))
}

/// Password/refresh grant client for one vendor.
pub struct VendorClient {
    vendor: Vendor,
    oauth: VendorOAuthClient,
    http: reqwest::Client,
    username: ResourceOwnerUsername,
    password: ResourceOwnerPassword,
    scopes: Vec<Scope>,
    invalid_grant_codes: Vec<String>,
    access_ttl_fallback: u64,
}

impl VendorClient {
    pub fn new(vendor: Vendor, config: &VendorConfig, timeout: Duration) -> Result<Self> {
        let token_url = TokenUrl::new(config.token_url.clone())
            .with_context(|| format!("Invalid token_url for {}", vendor))?;
        // Neither grant redirects a user agent; the authorize URL is never used.
        let auth_url = AuthUrl::new(config.token_url.clone())
            .with_context(|| format!("Invalid token_url for {}", vendor))?;

        let auth_type = match config.auth_style {
            AuthStyle::Basic => AuthType::BasicAuth,
            AuthStyle::RequestBody => AuthType::RequestBody,
        };
        let oauth = VendorOAuthClient::new(
            ClientId::new(config.client_id.clone()),
            config.client_secret.clone().map(ClientSecret::new),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(auth_type);

        // Token endpoints never redirect.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            vendor,
            oauth,
            http,
            username: ResourceOwnerUsername::new(config.username.clone()),
            password: ResourceOwnerPassword::new(config.password.clone()),
            scopes: config.scopes.iter().cloned().map(Scope::new).collect(),
            invalid_grant_codes: config.invalid_grant_codes.clone(),
            access_ttl_fallback: config.access_ttl_fallback_secs,
        })
    }

    fn issued(&self, response: VendorTokenResponse) -> IssuedTokens {
        IssuedTokens {
            access_token: response.access_token().secret().to_string(),
            refresh_token: response.refresh_token().map(|t| t.secret().to_string()),
            access_ttl: response.access_ttl().unwrap_or(self.access_ttl_fallback),
            refresh_ttl: response.refresh_ttl(),
        }
    }

    fn classify(&self, err: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> GrantError {
        match err {
            RequestTokenError::ServerResponse(response) => rejection(
                &self.invalid_grant_codes,
                response.error().to_string(),
                response.error_description().cloned().unwrap_or_default(),
            ),
            RequestTokenError::Parse(parse_err, body) => match parse_error_body(&body) {
                Some((code, description)) => {
                    rejection(&self.invalid_grant_codes, code, description)
                }
                // A 200 body that fails to decode still carries live tokens.
                None => GrantError::Malformed(format!(
                    "{:?} error at `{}` (line {}, column {})",
                    parse_err.inner().classify(),
                    parse_err.path(),
                    parse_err.inner().line(),
                    parse_err.inner().column()
                )),
            },
            RequestTokenError::Request(e) => GrantError::Transport(e.to_string()),
            RequestTokenError::Other(msg) => GrantError::Malformed(msg),
        }
    }
}

/// Map a vendor error code onto the grant error taxonomy.
pub(crate) fn rejection(
    invalid_grant_codes: &[String],
    code: String,
    description: String,
) -> GrantError {
    if invalid_grant_codes
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&code))
    {
        GrantError::InvalidGrant { code }
    } else {
        GrantError::Rejected { code, description }
    }
}

/// Transport for the oauth2 crate: the shared reqwest client, so the
/// configured timeout applies to every grant.
async fn send(http: reqwest::Client, request: HttpRequest) -> Result<HttpResponse, reqwest::Error> {
    let response = http
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

#[async_trait]
impl TokenGrant for VendorClient {
    async fn authenticate(&self) -> Result<IssuedTokens, GrantError> {
        tracing::debug!("Requesting password grant from {}", self.vendor);

        let http = self.http.clone();
        let response = self
            .oauth
            .exchange_password(&self.username, &self.password)
            .add_scopes(self.scopes.clone())
            .request_async(move |request| send(http, request))
            .await
            .map_err(|e| self.classify(e))?;

        Ok(self.issued(response))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, GrantError> {
        tracing::debug!("Requesting refresh grant from {}", self.vendor);

        let http = self.http.clone();
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let response = self
            .oauth
            .exchange_refresh_token(&refresh_token)
            .add_scopes(self.scopes.clone())
            .request_async(move |request| send(http, request))
            .await
            .map_err(|e| self.classify(e))?;

        Ok(self.issued(response))
    }
}
