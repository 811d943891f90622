// Retry with randomized exponential backoff, stopped by a cancellation token

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::RefreshError;

/// Backoff settings for credential refresh retries
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Scale of the exponential ceiling: multiplier * 2^attempt
    pub multiplier: Duration,
    /// Floor applied after sampling
    pub min_delay: Duration,
    /// Cap applied after sampling
    pub max_delay: Duration,
    /// Stop after this many attempts; `None` retries until cancelled
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            multiplier: Duration::from_secs(10),
            min_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the given failed attempt (1-based):
    /// a uniform sample from `[0, multiplier * 2^attempt]`, clamped to `[min_delay, max_delay]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let ceiling = self
            .multiplier
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);

        let sampled = Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms));
        sampled.clamp(self.min_delay, self.max_delay)
    }
}

/// Run `operation` until it succeeds, sleeping per `policy` between failures.
///
/// The sleep wakes early when `token` is cancelled, which ends the retries. An
/// attempt already in flight is never interrupted.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &BackoffPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, RefreshError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(RefreshError::Exhausted {
                attempts: attempt,
                source: err,
            });
        }

        if token.is_cancelled() {
            return Err(RefreshError::Cancelled {
                attempts: attempt,
                source: err,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::error!(
            attempt = attempt,
            delay_secs = delay.as_secs(),
            error = %format!("{:#}", err),
            "Unable to fetch credentials, retrying"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(RefreshError::Cancelled {
                    attempts: attempt,
                    source: err,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
