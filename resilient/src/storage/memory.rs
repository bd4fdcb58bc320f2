//! In-memory reference storage.

use super::{Mutation, Storage, StorageResponse};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Process-local storage. Batches are applied atomically.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Returns a copy of the stored keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    fn apply(values: &mut HashMap<String, Value>, mutation: Mutation) {
        match mutation {
            Mutation::Set { key, value } => {
                values.insert(key, value);
            }
            Mutation::Delete { key } => {
                values.remove(&key);
            }
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> anyhow::Result<StorageResponse> {
        Ok(StorageResponse::new(key, self.values.read().get(key).cloned()))
    }

    async fn set(&self, mutation: Mutation) -> anyhow::Result<()> {
        Self::apply(&mut self.values.write(), mutation);
        Ok(())
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn batch(&self, mutations: Vec<Mutation>) -> anyhow::Result<()> {
        let mut values = self.values.write();
        for mutation in mutations {
            Self::apply(&mut values, mutation);
        }
        Ok(())
    }
}
