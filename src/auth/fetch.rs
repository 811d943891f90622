// Enphase cloud token fetch: login for a session, then exchange it for a token

use anyhow::{Context, Result};
use reqwest::{header, Client};

use super::types::{FetchedCredentials, LoginResponse, RemoteApiConfig, TokenResponse};

/// Session cookie the token endpoint expects
const SESSION_COOKIE: &str = "_enlighten_4_session";

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Log in with username and password and return the session id
pub async fn login(client: &Client, base_url: &str, username: &str, password: &str) -> Result<String> {
    tracing::debug!("Logging in to Enphase cloud as {}", username);

    let form = [("user[email]", username), ("user[password]", password)];

    let response = client
        .post(endpoint(base_url, "/login/login.json"))
        .form(&form)
        .send()
        .await
        .context("Failed to send login request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Login failed: {} - {}", status, error_text);
    }

    let data: LoginResponse = response
        .json()
        .await
        .context("Failed to parse login response")?;

    if data.session_id.is_empty() {
        anyhow::bail!("Login response does not contain session_id");
    }

    Ok(data.session_id)
}

/// Exchange a session id for a token scoped to one gateway
pub async fn fetch_token(
    client: &Client,
    base_url: &str,
    serialno: &str,
    session_id: &str,
) -> Result<FetchedCredentials> {
    tracing::debug!("Requesting token for gateway {}", serialno);

    let response = client
        .get(endpoint(base_url, "/entrez-auth-token"))
        .query(&[("serial_num", serialno)])
        .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session_id))
        .send()
        .await
        .context("Failed to send token request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Token request failed: {} - {}", status, error_text);
    }

    let data: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;

    if data.token.is_empty() {
        anyhow::bail!("Token response does not contain token");
    }

    FetchedCredentials::try_from(data)
}

/// Run the full two-step fetch against the configured Enphase cloud
pub async fn fetch_credentials(client: &Client, config: &RemoteApiConfig) -> Result<FetchedCredentials> {
    let username = config
        .username
        .as_deref()
        .context("Remote API username is required to fetch credentials")?;
    let password = config
        .password
        .as_deref()
        .context("Remote API password is required to fetch credentials")?;
    let serialno = config
        .serialno
        .as_deref()
        .context("Gateway serial number is required to fetch credentials")?;

    let session_id = login(client, &config.url, username, password).await?;
    let credentials = fetch_token(client, &config.url, serialno, &session_id).await?;

    tracing::info!(
        "Fetched new credentials, issued: {}, expires: {}",
        credentials.fetched_at.to_rfc3339(),
        credentials.expires_at.to_rfc3339()
    );

    Ok(credentials)
}
