//! Exponential-backoff retry wrapper (§4.2). Generic over the operation;
//! the deadline check happens both before each attempt and during the
//! backoff sleep so a cancelled caller doesn't keep retrying in the
//! background.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        scaled.min(self.max_delay)
    }

    /// Run `f` up to `max_attempts` times. Retries only while `should_retry`
    /// returns true for the error; a non-retryable error returns immediately.
    /// Aborts with the in-flight error if `deadline` passes, either before an
    /// attempt or mid-sleep.
    pub async fn run<T, F, Fut>(
        &self,
        deadline: Option<Instant>,
        should_retry: impl Fn(&AppError) -> bool,
        mut f: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 0;
        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(AppError::Timeout);
                }
            }

            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !should_retry(&e) {
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt - 1);
                    if let Some(deadline) = deadline {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(e);
                        }
                        let remaining = deadline - now;
                        tokio::time::sleep(delay.min(remaining)).await;
                        if Instant::now() >= deadline {
                            return Err(e);
                        }
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
