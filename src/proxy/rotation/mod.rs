//! Proxy rotation strategies
//!
//! Selectors pick one record out of the pool's healthy set. The pool hands
//! them the healthy records in key order while holding its lock, so a
//! selector never sees a partially updated table.

mod best;
mod random;
mod round_robin;

pub use best::BestSelector;
pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;

use crate::models::ProxyRecord;

/// Strategy types for proxy rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    Best,
}

impl RotationStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "random" => Self::Random,
            "best" | "fastest" | "lowest_latency" | "lowest-latency" => Self::Best,
            _ => Self::RoundRobin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::Best => "best",
        }
    }
}

/// Trait for proxy selection strategies
pub trait ProxySelector: Send + Sync {
    /// Pick an index into `healthy`.
    ///
    /// Returns `None` only when `healthy` is empty.
    fn select(&self, healthy: &[&ProxyRecord]) -> Option<usize>;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

#[cfg(test)]
pub(crate) fn test_record(port: u16, response_time: f64) -> ProxyRecord {
    let mut record = ProxyRecord::new("localhost", port, crate::models::ProxyProtocol::Socks5);
    record.response_time = response_time;
    record
}
