// Background credential updater
// Serves the last good token synchronously and keeps it fresh from a background task

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::retry::{retry_with_backoff, BackoffPolicy};
use super::CredentialSource;
use crate::error::RefreshError;

/// Timing settings for the updater
#[derive(Debug, Clone)]
pub struct UpdaterSettings {
    /// How often to ask the source whether a refresh is due
    pub refresh_interval: Duration,

    /// Retry policy for a failed refresh
    pub backoff: BackoffPolicy,

    /// How long `shutdown` waits for the background task before aborting it
    pub shutdown_grace: Duration,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            backoff: BackoffPolicy::default(),
            shutdown_grace: Duration::from_secs(60),
        }
    }
}

/// Credentials updater
///
/// Holds the last token the source returned successfully. Reads never block on the
/// network: freshness is entirely the job of the background task started by [`start`].
///
/// [`start`]: CredentialsUpdater::start
pub struct CredentialsUpdater {
    /// Last known good token
    data_cache: watch::Receiver<String>,

    /// Shutdown signal for the background task
    updater_canceled: CancellationToken,

    /// Background task, taken by `shutdown`
    task: Mutex<Option<JoinHandle<()>>>,

    shutdown_grace: Duration,
}

impl CredentialsUpdater {
    /// Fetch the initial token and start the background refresh task.
    ///
    /// Fails if the initial fetch fails; the caller must not serve traffic in that case.
    pub async fn start(source: Arc<dyn CredentialSource>, settings: UpdaterSettings) -> Result<Self> {
        tracing::info!("Fetching initial credentials");
        let initial = source
            .credentials()
            .await
            .context("Failed to fetch initial credentials")?;

        let (cache_tx, data_cache) = watch::channel(initial);
        let updater_canceled = CancellationToken::new();

        tracing::info!(
            "Registering credentials updater background task (interval: {}s)",
            settings.refresh_interval.as_secs()
        );
        let task = tokio::spawn(background_looper(
            source,
            cache_tx,
            updater_canceled.clone(),
            settings.refresh_interval,
            settings.backoff,
        ));

        Ok(Self {
            data_cache,
            updater_canceled,
            task: Mutex::new(Some(task)),
            shutdown_grace: settings.shutdown_grace,
        })
    }

    /// Current token, never blocks
    pub fn credentials(&self) -> String {
        self.data_cache.borrow().clone()
    }

    /// Whether the background task is still alive
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Signal the background task to stop without waiting for it
    pub fn cancel(&self) {
        self.updater_canceled.cancel();
    }

    /// Stop the background task, aborting it if it has not exited within the grace period
    pub async fn shutdown(&self) {
        tracing::info!("Signaling credentials updater background task to stop");
        self.cancel();

        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        let Some(mut handle) = task else {
            return;
        };

        match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Credentials updater background task failed: {}", e);
            }
            Err(_) => {
                tracing::warn!(
                    "Credentials updater did not stop within {}s, aborting",
                    self.shutdown_grace.as_secs()
                );
                handle.abort();
                // Reap the aborted task so it is gone when we return
                let _ = handle.await;
            }
        }
    }
}

/// Wait for the refresh interval or cancellation, refreshing after each interval
async fn background_looper(
    source: Arc<dyn CredentialSource>,
    cache_tx: watch::Sender<String>,
    canceled: CancellationToken,
    refresh_interval: Duration,
    backoff: BackoffPolicy,
) {
    loop {
        tokio::select! {
            biased;
            _ = canceled.cancelled() => break,
            _ = tokio::time::sleep(refresh_interval) => {}
        }

        // A failed refresh keeps the previous token and waits for the next interval
        if let Err(e) = refresh_credentials(source.as_ref(), &cache_tx, &canceled, &backoff).await {
            tracing::error!("{}", e);
        }
    }

    tracing::info!("Credentials updater background task shutting down");
}

/// Ask the source for a token, retrying with backoff, and publish it on success
async fn refresh_credentials(
    source: &dyn CredentialSource,
    cache_tx: &watch::Sender<String>,
    canceled: &CancellationToken,
    backoff: &BackoffPolicy,
) -> Result<(), RefreshError> {
    let timer = Instant::now();

    let token = retry_with_backoff(backoff, canceled, || source.credentials()).await?;
    cache_tx.send_replace(token);

    tracing::info!(
        "Finished refreshing credentials in {:.4} seconds",
        timer.elapsed().as_secs_f64()
    );
    Ok(())
}
