//! warp-pool - health-checked outbound proxy pool
//!
//! Spreads calls to rate-limited market-data providers across a fixed set of
//! local WARP proxies.
//!
//! ## Features
//!
//! - Round-robin, random and lowest-latency proxy selection
//! - HTTP, SOCKS4 and SOCKS5 proxy support
//! - Background health probing with demotion and recovery
//! - Global outbound pacing and retry with exponential backoff
//! - Proxy state persisted to PostgreSQL when configured
//! - Admin API for pool status and forced health checks

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{PoolError, Result};
pub use proxy::ProxyPool;
