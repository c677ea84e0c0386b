//! Retry utilities with exponential backoff for transient transport failures.
//!
//! Only the HTTP transport retries. Engines and the reconciler see either a
//! response or the final error, so a retried request never counts twice
//! against a plan's estimate.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::sources::SourceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Time allowed for one attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Backoff before attempt `failed + 1`
    fn backoff(&self, failed: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(failed.saturating_sub(1) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Failures worth another attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransientError {
    /// Connection refused, reset, DNS failure
    Network,
    /// 429, with the server's retry-after seconds if sent
    RateLimit(Option<u64>),
    /// 5xx
    ServerError,
    /// The attempt ran past `attempt_timeout`
    Timeout,
}

impl TransientError {
    /// Classify a source error; `None` means the failure is permanent
    pub fn from_source_error(err: &SourceError) -> Option<Self> {
        match err {
            SourceError::RateLimit(retry_after) => Some(TransientError::RateLimit(*retry_after)),
            SourceError::Network(_) => Some(TransientError::Network),
            SourceError::Api { status, .. } if *status >= 500 => Some(TransientError::ServerError),
            _ => None,
        }
    }

    /// Minimum wait before retrying
    pub fn recommended_delay(&self) -> Duration {
        match self {
            TransientError::RateLimit(Some(seconds)) => Duration::from_secs(*seconds + 1),
            // Elsevier and NCBI windows are per second; a blind wait of a few seconds clears them
            TransientError::RateLimit(None) => Duration::from_secs(5),
            TransientError::ServerError | TransientError::Network => Duration::from_secs(2),
            TransientError::Timeout => Duration::ZERO,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
///
/// The wait between attempts is the larger of the exponential backoff and the
/// error's recommended delay, capped at `max_delay`.
pub async fn with_retry<T, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut failed = 0;

    loop {
        let (error, transient) = match timeout(config.attempt_timeout, operation()).await {
            Ok(Ok(value)) => {
                if failed > 0 {
                    tracing::debug!(attempts = failed + 1, "Request succeeded after retrying");
                }
                return Ok(value);
            }
            Ok(Err(error)) => match TransientError::from_source_error(&error) {
                Some(transient) => (error, transient),
                None => return Err(error),
            },
            Err(_) => (
                SourceError::Network(format!(
                    "request timed out after {:?}",
                    config.attempt_timeout
                )),
                TransientError::Timeout,
            ),
        };
        failed += 1;

        if failed >= config.max_attempts {
            tracing::warn!(attempts = failed, error = %error, "Giving up on request");
            return Err(error);
        }

        let delay = config
            .backoff(failed)
            .max(transient.recommended_delay())
            .min(config.max_delay);
        tracing::debug!(attempt = failed, ?transient, ?delay, "Retrying request");
        sleep(delay).await;
    }
}
