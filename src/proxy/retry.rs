//! Bounded retry with exponential backoff and jitter
//!
//! Wraps a single outbound call. Rate limiting, timeouts and connection
//! failures are retried; everything else fails on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::error::PoolError;

/// Upper bound on the deterministic part of a backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Classifies an error as transient (worth another attempt) or fatal
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PoolError {
    fn is_retryable(&self) -> bool {
        match self {
            PoolError::RateLimited
            | PoolError::Timeout
            | PoolError::ProxyConnectionFailed(_)
            | PoolError::DatabaseConnection(_) => true,
            PoolError::UnexpectedStatus(status) => *status == 429,
            PoolError::Transport(msg) | PoolError::Http(msg) | PoolError::ProbeFailed(msg) => {
                is_retryable_message(msg)
            }
            PoolError::Io(e) => is_retryable_message(&e.to_string()),
            _ => false,
        }
    }
}

/// Message-based classification for errors that only carry text
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
}

/// Retry policy for outbound calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in seconds, doubled on every retry
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 1.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.backoff_factor)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor: backoff_factor.max(0.0),
        }
    }

    /// Deterministic part of the delay before retry `attempt` (1-based),
    /// capped at one hour
    pub fn backoff_base(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        Duration::try_from_secs_f64(self.backoff_factor * 2f64.powi(exponent))
            .map(|d| d.min(MAX_BACKOFF))
            .unwrap_or(MAX_BACKOFF)
    }

    /// Full delay before retry `attempt`: base plus up to one second of jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.backoff_base(attempt) + Duration::from_secs_f64(jitter)
    }

    /// Run `op` until it succeeds, fails fatally, or retries are exhausted
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                debug!(
                    "Retry {} of {}, waiting {:.2}s",
                    attempt,
                    self.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        attempts,
                        e
                    );

                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if attempt >= self.max_retries {
                        error!("All retries failed, last error: {}", e);
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
