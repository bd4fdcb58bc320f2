//! Pluggable key/value storage backing the durable execution queue.
//!
//! A backend implements [`Storage`]; [`StorageAdapter`] maps queue-level
//! operations (ordered id list, per-id values) onto its keys.

mod adapter;
mod memory;

pub use adapter::{Entry, EntryMutation, StorageAdapter, IDS_KEY, VALUE_PREFIX};
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of reading a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResponse {
    /// The key that was read.
    pub key: String,
    /// The stored value, if the key exists.
    pub value: Option<Value>,
}

impl StorageResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Returns true if the key exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}

/// A single write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Stores `value` under `key`.
    Set {
        /// Target key.
        key: String,
        /// Value to store.
        value: Value,
    },
    /// Removes `key`.
    Delete {
        /// Target key.
        key: String,
    },
}

impl Mutation {
    /// Creates a set mutation.
    #[must_use]
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        Self::Set {
            key: key.into(),
            value,
        }
    }

    /// Creates a delete mutation.
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Returns the target key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A key/value storage backend.
///
/// Values round-trip unchanged. Backends able to apply several mutations
/// atomically advertise it through [`supports_batch`](Self::supports_batch).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads a key.
    async fn get(&self, key: &str) -> anyhow::Result<StorageResponse>;

    /// Applies a single mutation.
    async fn set(&self, mutation: Mutation) -> anyhow::Result<()>;

    /// Returns true if [`batch`](Self::batch) is natively supported.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Applies several mutations at once.
    ///
    /// The default applies them one by one.
    async fn batch(&self, mutations: Vec<Mutation>) -> anyhow::Result<()> {
        for mutation in mutations {
            self.set(mutation).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_key() {
        assert_eq!(Mutation::set("a", serde_json::json!(1)).key(), "a");
        assert_eq!(Mutation::delete("b").key(), "b");
    }

    #[test]
    fn test_mutation_serialization() {
        let json = serde_json::to_value(Mutation::delete("ids")).unwrap();
        assert_eq!(json, serde_json::json!({"op": "delete", "key": "ids"}));
    }

    #[test]
    fn test_response_exists() {
        assert!(StorageResponse::new("k", Some(serde_json::json!(null))).exists());
        assert!(!StorageResponse::new("k", None).exists());
    }
}
