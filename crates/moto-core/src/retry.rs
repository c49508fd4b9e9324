//! Retry with exponential backoff for transient fetch failures.
//!
//! Wraps any [`Fetcher`]; only errors for which
//! [`AppError::is_retryable`] holds are retried. Client errors such as 404
//! fail on the first attempt.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use moto_core::retry::{RetryPolicy, RetryingFetcher};
//! # use moto_core::traits::Fetcher;
//! # #[derive(Clone)] struct MyFetcher;
//! # impl Fetcher for MyFetcher {
//! #     async fn fetch(&self, _: &str) -> Result<String, moto_core::AppError> { todo!() }
//! #     async fn fetch_bytes(&self, _: &str) -> Result<Vec<u8>, moto_core::AppError> { todo!() }
//! # }
//! let fetcher = RetryingFetcher::new(MyFetcher, RetryPolicy::new(3, Duration::from_millis(500)));
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::traits::Fetcher;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled for each further one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    pub async fn run<T, Fut>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Fut,
    ) -> Result<T, AppError>
    where
        Fut: Future<Output = Result<T, AppError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        %what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::warn!(%what, attempt, error = %e, "Giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, 500ms then 1s between them.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// A [`Fetcher`] wrapper that retries transient failures.
#[derive(Clone)]
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> RetryingFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<F: Fetcher> Fetcher for RetryingFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.policy.run(url, || self.inner.fetch(url)).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.policy.run(url, || self.inner.fetch_bytes(url)).await
    }
}
