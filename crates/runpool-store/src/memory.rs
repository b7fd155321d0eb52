use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::{validate_key, StoreError, VersionedStore, DEFAULT_NAMESPACE};

type Table = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// Process-local store. Clones and [`MemoryStore::namespaced`] views share one table.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    namespace: String,
    table: Table,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl MemoryStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Another view over the same table with its own namespace.
    pub fn namespaced(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table: self.table.clone(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}

impl VersionedStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        Ok(table.get(&self.full_key(key)).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        table.insert(self.full_key(key), bytes.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let prefix = self.prefix();
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let before = table.len();
        table.retain(|k, _| !k.starts_with(&prefix));
        tracing::info!(
            target: "runpool_proof",
            event = "store_cleared",
            backend = "memory",
            namespace = %self.namespace,
            removed = before - table.len(),
            "cleared store"
        );
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let prefix = self.prefix();
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        Ok(table
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}
