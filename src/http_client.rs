use anyhow::{Context, Result};
use axum::http::{header, HeaderMap, HeaderName, Method};
use bytes::Bytes;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialsUpdater;
use crate::error::ApiError;

/// Headers that describe a single connection and must not be forwarded
static HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// HTTP client for the gateway's local API
pub struct LocalApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL of the local API, without trailing slash
    base_url: String,

    /// Source of the bearer token
    credentials: Arc<CredentialsUpdater>,
}

impl LocalApiClient {
    /// Create a new local API client
    ///
    /// The gateway serves a self-signed certificate, so verification is disabled.
    pub fn new(base_url: &str, credentials: Arc<CredentialsUpdater>, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Forward a request to the local API with the current bearer token
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path_and_query);

        tracing::debug!(
            method = %method,
            url = %url,
            "Forwarding request to local API"
        );

        let response = self
            .client
            .request(method, &url)
            .headers(request_headers(headers))
            .bearer_auth(self.credentials.credentials())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else {
                    "unknown"
                };

                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "Local API request error"
                );

                if e.is_timeout() {
                    ApiError::UpstreamTimeout(e.to_string())
                } else if e.is_connect() || e.is_request() {
                    ApiError::UpstreamUnavailable(e.to_string())
                } else {
                    ApiError::Internal(anyhow::anyhow!("Local API request failed: {}", e))
                }
            })?;

        tracing::debug!(
            status = %response.status(),
            "Received local API response"
        );

        Ok(response)
    }
}

/// Client headers worth passing on; the token always comes from the updater
fn request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = strip_hop_by_hop(headers);
    forwarded.remove(header::HOST);
    forwarded.remove(header::AUTHORIZATION);
    forwarded.remove(header::CONTENT_LENGTH);
    forwarded
}

/// Upstream headers worth returning; the body is re-streamed so its length is dropped
pub fn response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = strip_hop_by_hop(headers);
    forwarded.remove(header::CONTENT_LENGTH);
    forwarded
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    // Connection may name further per-hop headers
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP_HEADERS.iter().chain(listed.iter()) {
        forwarded.remove(name);
    }
    forwarded
}
