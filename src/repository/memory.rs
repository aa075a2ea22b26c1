use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ProxyStore, StoredFields};
use crate::error::Result;

/// Process-local store, used when no database is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, StoredFields>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. with state left by a previous run
    pub fn with_records(records: HashMap<String, StoredFields>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredFields> {
        self.records.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn load_all(&self) -> Result<HashMap<String, StoredFields>> {
        Ok(self.records.read().clone())
    }

    async fn save(&self, key: &str, fields: &StoredFields) -> Result<()> {
        self.records.write().insert(key.to_string(), fields.clone());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
