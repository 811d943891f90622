// Authentication module
// Fetches the Enphase token and keeps it fresh for the proxy

mod fetch;
mod manager;
mod retry;
mod types;
mod updater;

use anyhow::Result;
use async_trait::async_trait;

pub use manager::CredentialsManager;
pub use retry::{retry_with_backoff, BackoffPolicy};
pub use types::{FetchedCredentials, RemoteApiConfig};
pub use updater::{CredentialsUpdater, UpdaterSettings};

/// Something that can produce a currently valid bearer token
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self) -> Result<String>;
}
