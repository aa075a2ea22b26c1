//! Persistence adapters for proxy health state
//!
//! The pool keeps its records in memory; a store mirrors every record as a
//! string-keyed hash so state survives restarts. Stores are written through
//! best-effort and read once at startup.

pub mod memory;
pub mod proxy_state;

pub use memory::MemoryStore;
pub use proxy_state::PgProxyStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// A persisted record: field name to string-encoded value
pub type StoredFields = HashMap<String, String>;

/// Durable key-value mirror of the pool, keyed by `host:port`
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Load every stored record
    async fn load_all(&self) -> Result<HashMap<String, StoredFields>>;

    /// Insert or overwrite one record
    async fn save(&self, key: &str, fields: &StoredFields) -> Result<()>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}
