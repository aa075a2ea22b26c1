//! Outbound call execution through the proxy pool
//!
//! Every call to a rate-limited provider goes through the same sequence:
//! wait on the shared limiter, take a proxy from the pool, run the call
//! under the retry policy, then report the outcome against that proxy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{PoolError, Result};
use crate::models::ProxyRecord;
use crate::proxy::{ProxyPool, RateLimiter, RetryPolicy};

/// Runs provider calls with pacing, proxy rotation and retries
#[derive(Clone)]
pub struct OutboundExecutor {
    pool: Arc<ProxyPool>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    /// Upper bound on a single attempt, if any
    attempt_timeout: Option<Duration>,
}

impl OutboundExecutor {
    pub fn new(pool: Arc<ProxyPool>, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            pool,
            limiter,
            retry,
            attempt_timeout: None,
        }
    }

    /// Fail an attempt with `PoolError::Timeout` once `limit` elapses
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Execute `op` with the proxy chosen for this call.
    ///
    /// `op` receives `None` when no healthy proxy exists and should then call
    /// the provider directly. All attempts use the same proxy; the final
    /// outcome is reported against it and the error, if any, is returned.
    #[instrument(skip_all)]
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(Option<ProxyRecord>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.limiter.wait_if_needed().await;

        let proxy = self.pool.get_proxy_for_request();
        match &proxy {
            Some(proxy) => debug!("Using proxy {}", proxy.key()),
            None => warn!("No healthy proxy available, calling provider directly"),
        }

        let attempt_timeout = self.attempt_timeout;
        let result = self
            .retry
            .run(|| {
                let attempt = op(proxy.clone());
                async move {
                    match attempt_timeout {
                        Some(limit) => match timeout(limit, attempt).await {
                            Ok(result) => result,
                            Err(_) => Err(PoolError::Timeout),
                        },
                        None => attempt.await,
                    }
                }
            })
            .await;

        if let Some(proxy) = &proxy {
            match &result {
                Ok(_) => self.pool.report_success(proxy).await,
                Err(e) => self.pool.report_error(proxy, e).await,
            }
        }

        result
    }
}
