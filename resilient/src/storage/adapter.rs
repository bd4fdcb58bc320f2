//! Queue-level view over a key/value store.

use super::{Mutation, Storage};
use crate::errors::{ResilientError, Result};
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;

/// Key holding the ordered list of queued ids.
pub const IDS_KEY: &str = "ids";

/// Prefix of the key holding the value of a queued id.
pub const VALUE_PREFIX: &str = "value-";

/// A queued value read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The queue id.
    pub id: String,
    /// The stored value, if the id has one.
    pub value: Option<Value>,
}

/// A write to a queued value.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryMutation {
    /// Stores the value of `id`.
    Put {
        /// The queue id.
        id: String,
        /// The value to store.
        value: Value,
    },
    /// Removes the value of `id`.
    Remove {
        /// The queue id.
        id: String,
    },
}

impl EntryMutation {
    fn into_mutation(self) -> Mutation {
        match self {
            Self::Put { id, value } => Mutation::set(value_key(&id), value),
            Self::Remove { id } => Mutation::delete(value_key(&id)),
        }
    }
}

fn value_key(id: &str) -> String {
    format!("{VALUE_PREFIX}{id}")
}

/// Translates id-level queue operations onto raw storage keys.
#[derive(Clone)]
pub struct StorageAdapter {
    storage: Arc<dyn Storage>,
}

impl StorageAdapter {
    /// Wraps a storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Reads the ordered id list. A missing list is empty.
    pub async fn get_ids(&self) -> Result<Vec<String>> {
        let response = self
            .storage
            .get(IDS_KEY)
            .await
            .map_err(ResilientError::storage)?;

        match response.value {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the ordered id list.
    pub async fn set_ids(&self, ids: &[String]) -> Result<()> {
        self.storage
            .set(Mutation::set(IDS_KEY, serde_json::to_value(ids)?))
            .await
            .map_err(ResilientError::storage)
    }

    /// Reads the values of several ids, in order.
    pub async fn get_values(&self, ids: &[String]) -> Result<Vec<Entry>> {
        let reads = ids.iter().map(|id| async move {
            let response = self
                .storage
                .get(&value_key(id))
                .await
                .map_err(ResilientError::storage)?;
            let id = response
                .key
                .strip_prefix(VALUE_PREFIX)
                .unwrap_or(id.as_str())
                .to_string();
            Ok::<_, ResilientError>(Entry {
                id,
                value: response.value,
            })
        });

        try_join_all(reads).await
    }

    /// Applies several value writes, batched when the backend supports it.
    pub async fn set_values(&self, mutations: Vec<EntryMutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        let mutations: Vec<Mutation> = mutations
            .into_iter()
            .map(EntryMutation::into_mutation)
            .collect();

        if self.storage.supports_batch() {
            return self
                .storage
                .batch(mutations)
                .await
                .map_err(ResilientError::storage);
        }

        try_join_all(mutations.into_iter().map(|mutation| self.storage.set(mutation)))
            .await
            .map(|_| ())
            .map_err(ResilientError::storage)
    }
}

impl std::fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("supports_batch", &self.storage.supports_batch())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageResponse};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    mockall::mock! {
        KeyValue {}

        #[async_trait]
        impl Storage for KeyValue {
            async fn get(&self, key: &str) -> anyhow::Result<StorageResponse>;
            async fn set(&self, mutation: Mutation) -> anyhow::Result<()>;
            fn supports_batch(&self) -> bool;
            async fn batch(&self, mutations: Vec<Mutation>) -> anyhow::Result<()>;
        }
    }

    #[tokio::test]
    async fn test_ids_round_trip_in_order() {
        let adapter = StorageAdapter::new(Arc::new(MemoryStorage::new()));
        assert!(adapter.get_ids().await.unwrap().is_empty());

        let ids = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        adapter.set_ids(&ids).await.unwrap();

        assert_eq!(adapter.get_ids().await.unwrap(), ids);
    }

    #[tokio::test]
    async fn test_values_round_trip() {
        let storage = Arc::new(MemoryStorage::new());
        let adapter = StorageAdapter::new(storage.clone());

        adapter
            .set_values(vec![
                EntryMutation::Put { id: "1".into(), value: json!({"n": 1}) },
                EntryMutation::Put { id: "2".into(), value: json!([true]) },
            ])
            .await
            .unwrap();
        assert!(storage.get("value-1").await.unwrap().exists());

        adapter
            .set_values(vec![EntryMutation::Remove { id: "1".into() }])
            .await
            .unwrap();

        let entries = adapter
            .get_values(&["1".to_string(), "2".to_string()])
            .await
            .unwrap();
        assert_eq!(
            entries,
            vec![
                Entry { id: "1".into(), value: None },
                Entry { id: "2".into(), value: Some(json!([true])) },
            ]
        );
    }

    #[tokio::test]
    async fn test_non_batching_store_gets_individual_sets() {
        let mut storage = MockKeyValue::new();
        storage.expect_supports_batch().return_const(false);
        storage.expect_batch().never();
        storage
            .expect_set()
            .times(2)
            .returning(|_| Ok(()));

        let adapter = StorageAdapter::new(Arc::new(storage));
        adapter
            .set_values(vec![
                EntryMutation::Put { id: "a".into(), value: json!(1) },
                EntryMutation::Remove { id: "b".into() },
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_batching_store_gets_one_batch() {
        let mut storage = MockKeyValue::new();
        storage.expect_supports_batch().return_const(true);
        storage.expect_set().never();
        storage
            .expect_batch()
            .withf(|mutations| {
                mutations
                    == &vec![Mutation::set("value-a", json!(1)), Mutation::delete("value-b")]
            })
            .times(1)
            .returning(|_| Ok(()));

        let adapter = StorageAdapter::new(Arc::new(storage));
        adapter
            .set_values(vec![
                EntryMutation::Put { id: "a".into(), value: json!(1) },
                EntryMutation::Remove { id: "b".into() },
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failures_are_storage_errors() {
        let mut storage = MockKeyValue::new();
        storage
            .expect_get()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let adapter = StorageAdapter::new(Arc::new(storage));
        let err = adapter.get_ids().await.unwrap_err();

        assert!(err.is_storage_error());
        assert_eq!(err.to_string(), "Storage error: connection reset");
    }

    #[tokio::test]
    async fn test_malformed_ids_are_serialization_errors() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(Mutation::set(IDS_KEY, json!("not a list"))).await.unwrap();

        let err = StorageAdapter::new(storage).get_ids().await.unwrap_err();
        assert!(matches!(err, ResilientError::Serialization(_)));
    }
}
