//! Round-robin proxy selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};

use super::ProxySelector;
use crate::models::ProxyRecord;

/// Selects proxies in round-robin order
///
/// The cursor only ever grows; it is reduced modulo the healthy count on
/// each call, so the set may shrink or grow between calls.
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for RoundRobinSelector {
    fn select(&self, healthy: &[&ProxyRecord]) -> Option<usize> {
        if healthy.is_empty() {
            return None;
        }

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(idx)
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}
