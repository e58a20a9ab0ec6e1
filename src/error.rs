use crate::auth::Vendor;

/// Failure reported by a vendor token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// The vendor rejected the refresh token itself; only full
    /// re-authentication can recover.
    #[error("refresh token rejected by vendor ({code})")]
    InvalidGrant { code: String },

    #[error("vendor rejected the grant ({code}): {description}")]
    Rejected { code: String, description: String },

    #[error("token endpoint request failed: {0}")]
    Transport(String),

    #[error("unexpected token endpoint response: {0}")]
    Malformed(String),
}

impl GrantError {
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, GrantError::InvalidGrant { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("token store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode token store: {0}")]
    Encode(#[from] toml::ser::Error),

    // toml errors quote the offending value, which may be a token.
    #[error("failed to decode token store{}", decode_location(.0))]
    Decode(#[from] toml::de::Error),
}

fn decode_location(err: &toml::de::Error) -> String {
    err.span()
        .map(|span| format!(" at byte {}", span.start))
        .unwrap_or_default()
}

/// Error returned to callers asking for an access token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("{0} is not configured")]
    NotConfigured(Vendor),

    #[error("authentication with {vendor} failed: {source}")]
    AuthenticationFailed {
        vendor: Vendor,
        #[source]
        source: GrantError,
    },

    #[error("token refresh for {vendor} failed: {source}")]
    RefreshFailed {
        vendor: Vendor,
        #[source]
        source: GrantError,
    },

    #[error("failed to persist {vendor} token: {source}")]
    Persistence {
        vendor: Vendor,
        #[source]
        source: StoreError,
    },
}
