//! Shared backoff-retry utility.
//!
//! Both the embedding client and the vector synchronizer retry through
//! this one policy instead of hand-rolled sleep loops: exponential delay
//! from a base, a hard attempt ceiling, and optional jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::core::errors::PipelineError;

#[derive(Debug, Clone)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        if !self.jitter {
            return base;
        }
        let spread = base.as_millis() as u64 / 4;
        if spread == 0 {
            return base;
        }
        let extra = rand::rng().random_range(0..=spread);
        base + Duration::from_millis(extra)
    }

    /// Runs `op` until it succeeds, returns a terminal error, or the
    /// attempt ceiling is reached. Only errors flagged retryable are
    /// retried.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
