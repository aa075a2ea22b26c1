//! Proxy pool core
//!
//! This module provides:
//! - The shared proxy pool and its selection strategies
//! - Background health checking through each proxy
//! - HTTP CONNECT and SOCKS transports
//! - Outbound call pacing and retry with backoff

pub mod health;
pub mod middleware;
pub mod pool;
pub mod probe;
pub mod retry;
pub mod rotation;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use health::{HealthChecker, HealthCheckerConfig, HealthCheckerHandle, HealthReport, ProbeOutcome};
pub use middleware::RateLimiter;
pub use pool::{PoolConfig, ProxyPool};
pub use probe::{HealthProbe, HttpProbe};
pub use retry::{RetryPolicy, Retryable};
pub use rotation::{ProxySelector, RotationStrategy};
pub use transport::{ProxyConnection, ProxyTransport};
