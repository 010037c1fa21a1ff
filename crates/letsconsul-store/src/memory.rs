//! In-memory store double used by tests across the workspace.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::KvStore;

/// `HashMap`-backed `KvStore`. Writes to keys registered with
/// [`MemoryStore::fail_puts_to`] fail with a transport error, which lets
/// tests exercise partial write-back.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    poisoned_keys: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put_value` against `key` fail.
    pub async fn fail_puts_to(&self, key: &str) {
        self.poisoned_keys.write().await.insert(key.to_string());
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put_value(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.poisoned_keys.read().await.contains(key) {
            return Err(StoreError::Transport(format!("injected failure for '{key}'")));
        }
        self.data.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
