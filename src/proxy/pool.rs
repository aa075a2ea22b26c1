//! The proxy pool
//!
//! Owns every configured proxy record behind a single lock, hands out
//! healthy proxies by strategy, folds reported outcomes and probe results
//! into the records, and mirrors every change to the store.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::Result;
use crate::models::{PoolStatus, ProxyEndpoint, ProxyRecord};
use crate::proxy::health::{
    self, HealthChecker, HealthCheckerConfig, HealthCheckerHandle, HealthReport, ProbeOutcome,
};
use crate::proxy::probe::HealthProbe;
use crate::proxy::rotation::{
    BestSelector, ProxySelector, RandomSelector, RotationStrategy, RoundRobinSelector,
};
use crate::repository::ProxyStore;

/// Pool configuration
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Strategy used by `get_proxy_for_request`
    pub default_strategy: RotationStrategy,
    /// Background checker settings, including the demotion threshold
    pub health: HealthCheckerConfig,
}

impl From<&Config> for PoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_strategy: RotationStrategy::from_str(&config.pool.rotation_strategy),
            health: HealthCheckerConfig::from(config),
        }
    }
}

/// Health-tracked set of outbound proxies, shared as `Arc<ProxyPool>`
pub struct ProxyPool {
    config: PoolConfig,
    /// Keyed by `host:port`; key order drives rotation and tie-breaks
    records: Mutex<BTreeMap<String, ProxyRecord>>,
    round_robin: RoundRobinSelector,
    random: RandomSelector,
    best: BestSelector,
    store: Arc<dyn ProxyStore>,
    probe: Arc<dyn HealthProbe>,
    checker: Mutex<Option<HealthCheckerHandle>>,
    /// Held from a record change until its save completes, so stored
    /// state is written in the same order the records changed
    write_order: AsyncMutex<()>,
}

impl ProxyPool {
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn ProxyStore>,
        probe: Arc<dyn HealthProbe>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            records: Mutex::new(BTreeMap::new()),
            round_robin: RoundRobinSelector::new(),
            random: RandomSelector::new(),
            best: BestSelector::new(),
            store,
            probe,
            checker: Mutex::new(None),
            write_order: AsyncMutex::new(()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Load the configured proxies and start background health checking
    #[instrument(skip_all, fields(proxies = endpoints.len()))]
    pub async fn initialize(self: &Arc<Self>, endpoints: &[ProxyEndpoint]) -> Result<()> {
        self.restore(endpoints).await;
        self.start_health_checker();
        Ok(())
    }

    /// Build the record table from config and stored state.
    ///
    /// Stored state wins for health fields; the configured protocol wins
    /// over a stored one. Returns the number of records restored from the
    /// store.
    pub async fn restore(&self, endpoints: &[ProxyEndpoint]) -> usize {
        let stored = match self.store.load_all().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    "Failed to load proxy state from {} store, starting fresh: {}",
                    self.store.backend_name(),
                    e
                );
                HashMap::new()
            }
        };

        let mut records = BTreeMap::new();
        let mut fresh = Vec::new();
        let mut restored = 0;

        for endpoint in endpoints {
            let key = endpoint.key();
            if records.contains_key(&key) {
                warn!("Duplicate proxy {} in configuration, ignoring", key);
                continue;
            }

            let record = match stored.get(&key).map(ProxyRecord::from_fields) {
                Some(Ok(mut record)) => {
                    record.protocol = endpoint.protocol;
                    restored += 1;
                    record
                }
                Some(Err(e)) => {
                    warn!("Discarding stored state for {}: {}", key, e);
                    let record = ProxyRecord::from(endpoint);
                    fresh.push(record.clone());
                    record
                }
                None => {
                    let record = ProxyRecord::from(endpoint);
                    fresh.push(record.clone());
                    record
                }
            };
            records.insert(key, record);
        }

        let ignored = stored.keys().filter(|k| !records.contains_key(*k)).count();
        if ignored > 0 {
            debug!("Ignoring {} stored proxies not present in configuration", ignored);
        }

        let total = records.len();
        let _write = self.write_order.lock().await;
        *self.records.lock() = records;

        for record in &fresh {
            self.persist(record).await;
        }

        info!(
            "Proxy pool initialized with {} proxies ({} restored from {} store)",
            total,
            restored,
            self.store.backend_name()
        );

        restored
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copies of every record, in key order
    pub fn records_snapshot(&self) -> Vec<ProxyRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn get_record(&self, key: &str) -> Option<ProxyRecord> {
        self.records.lock().get(key).cloned()
    }

    pub fn get_healthy_proxies(&self) -> Vec<ProxyRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.is_healthy)
            .cloned()
            .collect()
    }

    /// Round robin over the healthy set; marks the pick as used
    pub fn get_next_proxy(&self) -> Option<ProxyRecord> {
        self.select_with(&self.round_robin, true)
    }

    pub fn get_random_proxy(&self) -> Option<ProxyRecord> {
        self.select_with(&self.random, false)
    }

    /// Lowest observed latency, ties broken by key order
    pub fn get_best_proxy(&self) -> Option<ProxyRecord> {
        self.select_with(&self.best, false)
    }

    pub fn get_proxy(&self, strategy: RotationStrategy) -> Option<ProxyRecord> {
        match strategy {
            RotationStrategy::RoundRobin => self.get_next_proxy(),
            RotationStrategy::Random => self.get_random_proxy(),
            RotationStrategy::Best => self.get_best_proxy(),
        }
    }

    /// Proxy for an outbound call, using the configured default strategy
    pub fn get_proxy_for_request(&self) -> Option<ProxyRecord> {
        self.get_proxy(self.config.default_strategy)
    }

    fn select_with(&self, selector: &dyn ProxySelector, mark_used: bool) -> Option<ProxyRecord> {
        let picked = {
            let mut records = self.records.lock();
            let key = {
                let healthy: Vec<&ProxyRecord> =
                    records.values().filter(|r| r.is_healthy).collect();
                selector.select(&healthy).map(|idx| healthy[idx].key())
            };

            match key {
                Some(key) => records.get_mut(&key).map(|record| {
                    if mark_used {
                        record.last_used = Some(Utc::now());
                    }
                    record.clone()
                }),
                None => None,
            }
        };

        match &picked {
            Some(record) => debug!(
                strategy = selector.strategy_name(),
                "Selected proxy {}",
                record.key()
            ),
            None => warn!("No healthy proxy available"),
        }

        picked
    }

    /// Apply `update` to one record under the lock and return a copy of the
    /// result, or `None` when the key is not in the pool.
    fn update_record<R>(
        &self,
        key: &str,
        update: impl FnOnce(&mut ProxyRecord) -> R,
    ) -> Option<(ProxyRecord, R)> {
        let mut records = self.records.lock();
        let record = records.get_mut(key)?;
        let result = update(record);
        Some((record.clone(), result))
    }

    async fn persist(&self, record: &ProxyRecord) {
        if let Err(e) = self.store.save(&record.key(), &record.to_fields()).await {
            warn!("Failed to persist proxy {}: {}", record.key(), e);
        }
    }

    /// Record a successful outbound call through `proxy`
    pub async fn report_success(&self, proxy: &ProxyRecord) {
        let key = proxy.key();
        let _write = self.write_order.lock().await;
        let Some((record, ())) = self.update_record(&key, |r| {
            r.success_count = r.success_count.saturating_add(1);
            r.error_count = r.error_count.saturating_sub(1);
            r.last_used = Some(Utc::now());
        }) else {
            warn!("Ignoring success report for unknown proxy {}", key);
            return;
        };

        debug!(
            "Proxy {} succeeded (errors: {}, successes: {})",
            key, record.error_count, record.success_count
        );
        self.persist(&record).await;
    }

    /// Record a failed outbound call through `proxy`
    pub async fn report_error(&self, proxy: &ProxyRecord, error: impl Display) {
        let key = proxy.key();
        let threshold = self.config.health.max_error_count;
        let _write = self.write_order.lock().await;
        let Some((record, demoted)) = self.update_record(&key, |r| {
            r.error_count = r.error_count.saturating_add(1);
            let demoted = r.is_healthy && r.error_count >= threshold;
            if r.error_count >= threshold {
                r.is_healthy = false;
            }
            demoted
        }) else {
            warn!("Ignoring error report for unknown proxy {}: {}", key, error);
            return;
        };

        if demoted {
            warn!(
                "Proxy {} marked unhealthy after {} errors: {}",
                key, record.error_count, error
            );
        } else {
            debug!(
                "Proxy {} error {}/{}: {}",
                key, record.error_count, threshold, error
            );
        }
        self.persist(&record).await;
    }

    /// Fold one probe result into the record for `key`
    pub async fn apply_probe_outcome(&self, key: &str, outcome: &ProbeOutcome) {
        let threshold = self.config.health.max_error_count;
        let _write = self.write_order.lock().await;
        let now = Utc::now();

        let updated = match outcome {
            ProbeOutcome::Healthy { latency } => self.update_record(key, |r| {
                let recovered = !r.is_healthy;
                r.is_healthy = true;
                r.error_count = 0;
                r.success_count = r.success_count.saturating_add(1);
                r.response_time = latency.as_secs_f64();
                r.last_check = Some(now);
                recovered
            }),
            ProbeOutcome::Failed { .. } => self.update_record(key, |r| {
                r.error_count = r.error_count.saturating_add(1);
                r.last_check = Some(now);
                let demoted = r.is_healthy && r.error_count >= threshold;
                if r.error_count >= threshold {
                    r.is_healthy = false;
                }
                demoted
            }),
        };

        let Some((record, transitioned)) = updated else {
            debug!("Proxy {} left the pool during a health check", key);
            return;
        };

        match outcome {
            ProbeOutcome::Healthy { .. } if transitioned => info!(
                "Proxy {} recovered ({:.2}s)",
                key, record.response_time
            ),
            ProbeOutcome::Healthy { .. } => debug!(
                "Proxy {} healthy ({:.2}s)",
                key, record.response_time
            ),
            ProbeOutcome::Failed { reason } if transitioned => warn!(
                "Proxy {} marked unhealthy after {} failed checks: {}",
                key, record.error_count, reason
            ),
            ProbeOutcome::Failed { reason } => debug!(
                "Proxy {} failed check {}/{}: {}",
                key, record.error_count, threshold, reason
            ),
        }

        self.persist(&record).await;
    }

    pub(crate) fn probe(&self) -> Arc<dyn HealthProbe> {
        self.probe.clone()
    }

    /// Probe every proxy now and wait for the results
    pub async fn force_health_check(&self) -> HealthReport {
        info!("Running forced health check");
        health::check_all(self, &self.config.health).await
    }

    pub fn get_pool_status(&self) -> PoolStatus {
        PoolStatus::from_records(self.records.lock().values())
    }

    /// Start the background checker unless one is already running
    pub fn start_health_checker(self: &Arc<Self>) {
        let mut checker = self.checker.lock();
        if checker.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Health checker already running");
            return;
        }

        *checker = Some(HealthChecker::new(self, self.config.health.clone()).spawn());
    }

    pub fn is_health_checker_running(&self) -> bool {
        self.checker
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the background checker and wait for it to exit
    pub async fn shutdown(&self) {
        let handle = self.checker.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        info!("Proxy pool shut down");
    }
}
