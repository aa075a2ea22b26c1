//! Outbound call rate limiting
//!
//! Enforces a minimum interval between consecutive outbound calls across
//! every task sharing the limiter. The wait happens inside the critical
//! section so concurrent callers are serialized and never bunch up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Spacing used for rates too small to represent
const MAX_MIN_INTERVAL: Duration = Duration::from_secs(3600);

/// Process-wide minimum-interval limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// `None` disables limiting
    min_interval: Option<Duration>,
    /// Completion time of the most recent admitted call
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `calls_per_second` calls per second.
    /// Non-positive or non-finite rates disable limiting; the spacing is
    /// capped at one hour.
    pub fn new(calls_per_second: f64) -> Self {
        let min_interval = if calls_per_second.is_finite() && calls_per_second > 0.0 {
            let interval = Duration::try_from_secs_f64(1.0 / calls_per_second)
                .map(|d| d.min(MAX_MIN_INTERVAL))
                .unwrap_or(MAX_MIN_INTERVAL);
            Some(interval)
        } else {
            None
        };

        Self {
            min_interval,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// A limiter that never waits
    pub fn disabled() -> Self {
        Self::new(0.0)
    }

    pub fn is_enabled(&self) -> bool {
        self.min_interval.is_some()
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    /// Wait until at least `min_interval` has elapsed since the previous
    /// admitted call, then record this call.
    pub async fn wait_if_needed(&self) {
        let Some(min_interval) = self.min_interval else {
            return;
        };

        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                let wait = min_interval - elapsed;
                debug!("Rate limit: waiting {:.3}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

impl From<&RateLimitConfig> for RateLimiter {
    fn from(config: &RateLimitConfig) -> Self {
        Self::new(config.calls_per_second)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(1.5)
    }
}
