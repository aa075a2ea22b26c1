//! Health checking for upstream proxies
//!
//! Periodically probes every proxy in the pool and folds the outcome into
//! its record. The first pass runs as soon as the checker starts.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::models::ProxyRecord;
use crate::proxy::pool::ProxyPool;
use crate::proxy::probe::HealthProbe;

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Interval between health checks
    pub check_interval: Duration,
    /// Timeout for each health check
    pub check_timeout: Duration,
    /// URL to use for health checks
    pub check_url: String,
    /// Status code a healthy proxy must return
    pub expected_status: u16,
    /// Consecutive failures before a proxy is marked unhealthy
    pub max_error_count: u32,
    /// Probes in flight during one pass
    pub concurrency: usize,
    /// Pause after a pass that failed as a whole
    pub retry_delay: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(10),
            check_url: "http://httpbin.org/ip".to_string(),
            expected_status: 200,
            max_error_count: 3,
            concurrency: 5,
            retry_delay: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for HealthCheckerConfig {
    fn from(config: &Config) -> Self {
        Self {
            check_interval: Duration::from_secs(config.health.interval_secs),
            check_timeout: Duration::from_secs(config.health.timeout_secs),
            check_url: config.health.url.clone(),
            expected_status: config.health.expected_status,
            max_error_count: config.pool.max_error_count,
            concurrency: config.health.concurrency,
            ..Self::default()
        }
    }
}

/// Result of one probe pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Result of probing a single proxy
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy { latency: Duration },
    Failed { reason: String },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy { .. })
    }
}

/// Background prober bound to one pool
///
/// Holds only a weak reference, so a dropped pool ends the loop.
pub struct HealthChecker {
    pool: Weak<ProxyPool>,
    config: HealthCheckerConfig,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(pool: &Arc<ProxyPool>, config: HealthCheckerConfig) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            config,
        }
    }

    /// Spawn the checker loop onto the runtime
    pub fn spawn(self) -> HealthCheckerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        HealthCheckerHandle { shutdown_tx, task }
    }

    /// Run the health checker (call in a spawned task)
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health checker with {}s interval",
            self.config.check_interval.as_secs()
        );

        loop {
            let Some(pool) = self.pool.upgrade() else {
                info!("Proxy pool dropped, health checker exiting");
                break;
            };

            let pass = AssertUnwindSafe(check_all(&pool, &self.config))
                .catch_unwind()
                .await;
            drop(pool);

            let delay = match pass {
                Ok(_) => self.config.check_interval,
                Err(_) => {
                    error!(
                        "Health check pass panicked, retrying in {}s",
                        self.config.retry_delay.as_secs()
                    );
                    self.config.retry_delay
                }
            };

            if wait_for_shutdown(&mut shutdown, delay).await {
                info!("Health checker shutting down");
                break;
            }
        }
    }
}

/// Probe every proxy once and apply the outcomes to the pool
pub async fn check_all(pool: &ProxyPool, config: &HealthCheckerConfig) -> HealthReport {
    let records = pool.records_snapshot();
    let probe = pool.probe();

    info!("Checking health of {} proxies", records.len());

    let results = futures::stream::iter(records)
        .map(|record| {
            let probe = probe.clone();
            async move {
                let outcome = probe_record(probe.as_ref(), &record, config.check_timeout).await;
                let healthy = outcome.is_healthy();
                pool.apply_probe_outcome(&record.key(), &outcome).await;
                healthy
            }
        })
        .buffer_unordered(config.concurrency.max(1))
        .collect::<Vec<bool>>()
        .await;

    let healthy = results.iter().filter(|&&ok| ok).count();
    let report = HealthReport {
        healthy,
        unhealthy: results.len() - healthy,
    };

    info!(
        "Health check complete: {} healthy, {} unhealthy",
        report.healthy, report.unhealthy
    );

    report
}

/// Probe one proxy, turning timeouts and panics into failures
#[instrument(skip(probe, record), fields(proxy = %record.key()))]
pub async fn probe_record(
    probe: &dyn HealthProbe,
    record: &ProxyRecord,
    check_timeout: Duration,
) -> ProbeOutcome {
    let attempt = AssertUnwindSafe(probe.probe(record)).catch_unwind();

    let outcome = match timeout(check_timeout, attempt).await {
        Ok(Ok(Ok(latency))) => ProbeOutcome::Healthy { latency },
        Ok(Ok(Err(e))) => ProbeOutcome::Failed {
            reason: e.to_string(),
        },
        Ok(Err(_)) => ProbeOutcome::Failed {
            reason: "probe panicked".to_string(),
        },
        Err(_) => ProbeOutcome::Failed {
            reason: format!("timed out after {}s", check_timeout.as_secs_f64()),
        },
    };

    if let ProbeOutcome::Failed { reason } = &outcome {
        debug!("Probe failed: {}", reason);
    }

    outcome
}

/// Sleep for `delay` unless shutdown is signalled first.
///
/// Returns true on shutdown. A dropped sender counts as shutdown.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    let deadline = tokio::time::sleep(delay);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

/// Owner-side handle of a running checker task
pub struct HealthCheckerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthCheckerHandle {
    /// Signal the loop to stop without waiting for it
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for the task to exit
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = self.task.await {
            warn!("Health checker task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use crate::proxy::testing::{loaded_pool, test_config, ProbeBehavior, ScriptedProbe};

    fn record() -> ProxyRecord {
        ProxyRecord::new("localhost", 40001, ProxyProtocol::Socks5)
    }

    #[test]
    fn test_config_defaults() {
        let config = HealthCheckerConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.check_timeout, Duration::from_secs(10));
        assert_eq!(config.max_error_count, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(10));
        assert_eq!(config.expected_status, 200);
    }

    #[tokio::test]
    async fn test_probe_record_success_and_failure() {
        let probe = ScriptedProbe::new();
        let outcome = probe_record(probe.as_ref(), &record(), Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            ProbeOutcome::Healthy {
                latency: Duration::from_millis(100)
            }
        );

        probe.set("localhost:40001", ProbeBehavior::Fail);
        let outcome = probe_record(probe.as_ref(), &record(), Duration::from_secs(1)).await;
        assert!(!outcome.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_record_timeout() {
        let probe = ScriptedProbe::new();
        probe.set("localhost:40001", ProbeBehavior::Hang);

        let outcome = probe_record(probe.as_ref(), &record(), Duration::from_secs(10)).await;
        match outcome {
            ProbeOutcome::Failed { reason } => assert!(reason.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_record_panic_is_contained() {
        let probe = ScriptedProbe::new();
        probe.set("localhost:40001", ProbeBehavior::Panic);

        let outcome = probe_record(probe.as_ref(), &record(), Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            ProbeOutcome::Failed {
                reason: "probe panicked".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_check_all_reports_counts() {
        let (pool, probe, _store) = loaded_pool(4).await;
        probe.set("localhost:40002", ProbeBehavior::Fail);
        probe.set("localhost:40004", ProbeBehavior::Panic);

        let report = check_all(&pool, &test_config().health).await;
        assert_eq!(report, HealthReport { healthy: 2, unhealthy: 2 });
        assert_eq!(probe.calls(), 4);

        // One failure is below the threshold, so nobody is demoted yet.
        assert_eq!(pool.get_healthy_proxies().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checker_runs_immediately_then_on_interval() {
        let (pool, probe, _store) = loaded_pool(3).await;
        let handle = HealthChecker::new(&pool, test_config().health).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.calls(), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls(), 6);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checker_exits_when_pool_dropped() {
        let (pool, _probe, _store) = loaded_pool(2).await;
        let handle = HealthChecker::new(&pool, test_config().health).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(pool);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(!wait_for_shutdown(&mut rx, Duration::from_secs(5)).await);

        tx.send(true).unwrap();
        assert!(wait_for_shutdown(&mut rx, Duration::from_secs(5)).await);

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(wait_for_shutdown(&mut rx, Duration::from_secs(5)).await);
    }
}
