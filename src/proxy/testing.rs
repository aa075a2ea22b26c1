//! Test doubles for the pool: a scripted probe and a store that always fails

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::health::HealthCheckerConfig;
use super::pool::{PoolConfig, ProxyPool};
use super::probe::HealthProbe;
use super::rotation::RotationStrategy;
use crate::error::{PoolError, Result};
use crate::models::{ProxyEndpoint, ProxyProtocol, ProxyRecord};
use crate::repository::{MemoryStore, ProxyStore, StoredFields};

/// What a scripted probe does for one proxy
#[derive(Debug, Clone)]
pub enum ProbeBehavior {
    Healthy(Duration),
    Fail,
    Hang,
    Panic,
}

/// Probe whose result per proxy key is set by the test
pub struct ScriptedProbe {
    behaviors: Mutex<HashMap<String, ProbeBehavior>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, key: &str, behavior: ProbeBehavior) {
        self.behaviors.lock().insert(key.to_string(), behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, proxy: &ProxyRecord) -> Result<Duration> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .get(&proxy.key())
            .cloned()
            .unwrap_or(ProbeBehavior::Healthy(Duration::from_millis(100)));

        match behavior {
            ProbeBehavior::Healthy(latency) => Ok(latency),
            ProbeBehavior::Fail => Err(PoolError::UnexpectedStatus(503)),
            ProbeBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            ProbeBehavior::Panic => panic!("probe exploded"),
        }
    }
}

/// Store that rejects every read and write
pub struct FailingStore;

#[async_trait]
impl ProxyStore for FailingStore {
    async fn load_all(&self) -> Result<HashMap<String, StoredFields>> {
        Err(PoolError::Persistence("store unavailable".into()))
    }

    async fn save(&self, _key: &str, _fields: &StoredFields) -> Result<()> {
        Err(PoolError::Persistence("store unavailable".into()))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// `count` local SOCKS5 endpoints on consecutive ports from 40001
pub fn endpoints(count: u16) -> Vec<ProxyEndpoint> {
    (0..count)
        .map(|i| ProxyEndpoint::new("localhost", 40001 + i, ProxyProtocol::Socks5))
        .collect()
}

pub fn test_config() -> PoolConfig {
    PoolConfig {
        default_strategy: RotationStrategy::RoundRobin,
        health: HealthCheckerConfig {
            check_interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(10),
            max_error_count: 3,
            concurrency: 4,
            ..HealthCheckerConfig::default()
        },
    }
}

/// Pool over an in-memory store with `count` records loaded and no checker
pub async fn loaded_pool(count: u16) -> (Arc<ProxyPool>, Arc<ScriptedProbe>, Arc<MemoryStore>) {
    let probe = ScriptedProbe::new();
    let store = Arc::new(MemoryStore::new());
    let pool = ProxyPool::new(test_config(), store.clone(), probe.clone());
    pool.restore(&endpoints(count)).await;
    (pool, probe, store)
}
