use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::Mutex;

use super::fetch;
use super::types::{FetchedCredentials, RemoteApiConfig};
use super::CredentialSource;

/// Credentials manager
/// Fetches the Enphase token on demand and keeps the last one until it is past halfway to expiry
pub struct CredentialsManager {
    /// Remote service settings
    config: RemoteApiConfig,

    /// HTTP client for the Enphase cloud
    client: Client,

    /// Last fetched credentials; the lock also serializes fetches
    data: Mutex<Option<FetchedCredentials>>,
}

impl CredentialsManager {
    /// Create a new CredentialsManager
    ///
    /// Certificate verification toward the remote service is disabled.
    pub fn new(mut config: RemoteApiConfig) -> Result<Self> {
        config.jwt = config.jwt.filter(|jwt| !jwt.is_empty());

        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(std::time::Duration::from_secs(config.timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            client,
            data: Mutex::new(None),
        })
    }

    /// Whether a static token was configured
    pub fn uses_static_token(&self) -> bool {
        self.config.jwt.is_some()
    }

    /// Get a valid token, fetching a new one if none is cached or the cached one is past halfway
    pub async fn credentials(&self) -> Result<String> {
        if let Some(ref jwt) = self.config.jwt {
            tracing::debug!("Using a locally provided token");
            return Ok(jwt.clone());
        }

        let mut data = self.data.lock().await;

        let needs_fetch = match data.as_ref() {
            None => {
                tracing::info!("No credentials known, fetching new credentials");
                true
            }
            Some(creds) if creds.needs_refresh(Utc::now()) => {
                tracing::info!(
                    "Credentials will expire at {}, fetching new credentials",
                    creds.expires_at.to_rfc3339()
                );
                true
            }
            Some(_) => false,
        };

        if needs_fetch {
            *data = Some(self.fetch_credentials().await?);
        }

        data.as_ref()
            .map(|creds| creds.token.clone())
            .context("No credentials available")
    }

    /// Snapshot of the cached credentials, if any were fetched
    pub async fn cached_credentials(&self) -> Option<FetchedCredentials> {
        self.data.lock().await.clone()
    }

    async fn fetch_credentials(&self) -> Result<FetchedCredentials> {
        fetch::fetch_credentials(&self.client, &self.config)
            .await
            .context("Failed to fetch credentials from the Enphase cloud")
    }
}

#[async_trait]
impl CredentialSource for CredentialsManager {
    async fn credentials(&self) -> Result<String> {
        CredentialsManager::credentials(self).await
    }
}
