use crate::config::types::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Result of running an operation under [`Backoff`].
///
/// `Exhausted` means every attempt failed. Callers treat it as "no data this
/// cycle" rather than as a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    Ok(T),
    Exhausted,
}

/// Bounded retry with linear, uncapped backoff.
///
/// After the n-th failed attempt the caller sleeps `n / sleep_divisor`
/// seconds. Every failure kind is retried the same way.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    max_retries: u32,
    sleep_divisor: f64,
}

impl Backoff {
    pub fn new(max_retries: u32, sleep_divisor: f64) -> Self {
        Self {
            max_retries: max_retries.max(1),
            sleep_divisor,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.sleep_divisor)
    }

    /// Delay slept after `attempt` failures.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::try_from_secs_f64(attempt as f64 / self.sleep_divisor).unwrap_or(Duration::MAX)
    }

    /// Run `operation` until it succeeds or `max_retries` attempts have failed.
    ///
    /// The operation must be safe to repeat; no deduplication happens here.
    pub async fn run<F, Fut, T, E>(&self, description: &str, mut operation: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => return Outcome::Ok(value),
                Err(e) => {
                    warn!(
                        description = %description,
                        attempt = attempt,
                        error = %e,
                        "Remote call failed"
                    );

                    attempt += 1;
                    if attempt >= self.max_retries {
                        error!(
                            description = %description,
                            attempts = attempt,
                            error = %e,
                            "Max retry limit reached, giving up for this cycle"
                        );
                        return Outcome::Exhausted;
                    }

                    tokio::time::sleep(self.delay_for(attempt)).await;
                }
            }
        }
    }
}
