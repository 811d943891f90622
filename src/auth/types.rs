// Credential types and Enphase auth service wire formats

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// A token issued by the Enphase cloud together with the validity window it claims.
///
/// Replaced wholesale on every refresh, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedCredentials {
    /// When the remote service issued the token
    pub fetched_at: DateTime<Utc>,
    /// When the remote service says the token stops working
    pub expires_at: DateTime<Utc>,
    /// Bearer token for the local API
    pub token: String,
}

impl FetchedCredentials {
    /// True once the token is closer to its expiry than to its issue time
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        (now - self.fetched_at) > (self.expires_at - now)
    }
}

/// Connection settings for the Enphase cloud
#[derive(Debug, Clone)]
pub struct RemoteApiConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub serialno: Option<String>,

    /// Pre-supplied token; when set nothing is ever fetched
    pub jwt: Option<String>,

    /// Per-request timeout in seconds
    pub timeout: u64,
}

/// Response of `POST /login/login.json`
#[derive(Deserialize)]
pub struct LoginResponse {
    pub session_id: String,
}

/// Response of `GET /entrez-auth-token`
#[derive(Deserialize)]
pub struct TokenResponse {
    pub generation_time: i64,
    pub expires_at: i64,
    pub token: String,
}

impl TryFrom<TokenResponse> for FetchedCredentials {
    type Error = anyhow::Error;

    fn try_from(data: TokenResponse) -> Result<Self> {
        Ok(Self {
            fetched_at: from_epoch(data.generation_time)
                .context("Token response has an invalid generation_time")?,
            expires_at: from_epoch(data.expires_at)
                .context("Token response has an invalid expires_at")?,
            token: data.token,
        })
    }
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("Timestamp out of range: {}", secs))
}
