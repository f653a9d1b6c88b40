use std::future::Future;
use std::time::Duration;

use tracing::warn;

use accolade_core::config::RecognitionConfig;
use accolade_core::ApplicationError;
use accolade_db::RepositoryError;

/// Bounded retry for store conflicts (a writer holding the lock, a busy database).
/// Any other store failure is surfaced on the first attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 25, max_delay_ms: 500 }
    }
}

impl From<&RecognitionConfig> for RetryPolicy {
    fn from(config: &RecognitionConfig) -> Self {
        Self {
            max_retries: config.max_conflict_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Runs `attempt_fn` until it succeeds, fails with a non-conflict error, or the
    /// retry budget is spent. Undecodable records come back as
    /// [`ApplicationError::Integrity`], every other failure as [`ApplicationError::Persistence`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt_fn: F,
    ) -> Result<T, ApplicationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_conflict() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        event_name = "recognition.store.conflict_retry",
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "store conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) if error.is_conflict() => {
                    warn!(
                        event_name = "recognition.store.conflict_exhausted",
                        operation,
                        attempts = attempt + 1,
                        error = %error,
                        "store conflict persisted past the retry budget"
                    );
                    return Err(ApplicationError::Persistence(format!(
                        "{operation} gave up after {} attempts: {error}",
                        attempt + 1
                    )));
                }
                Err(RepositoryError::Decode(message)) => {
                    return Err(ApplicationError::Integrity(format!("{operation}: {message}")));
                }
                Err(error) => {
                    let message = format!("{operation} failed: {error}");
                    return Err(ApplicationError::Persistence(message));
                }
            }
        }
    }
}
