//! Fixed-delay retry policy for whole-batch storage attempts.
//!
//! [`RetryPolicy::run`] is a plain decorator: it takes the operation, the
//! attempt bound and delay (from the policy itself), and a predicate that
//! decides which errors are worth another attempt. It knows nothing about
//! case logs or storage, so it can be tested on its own.

use std::future::Future;
use std::time::Duration;

/// Attempts observed in the upstream write path.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Fixed pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A single attempt, no retry.
    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempt bound is reached. The last error is returned.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying",
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::error!(attempt, error = %e, "Giving up after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
