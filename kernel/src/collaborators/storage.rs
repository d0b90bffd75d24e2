//! Storage collaborator interface.
//!
//! Persistence is best-effort: the in-memory maps of the core stay
//! authoritative, and a failed write only produces a warning.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Collection names used by the core.
pub mod collections {
    /// Active sessions.
    pub const SESSIONS: &str = "sessions";
    /// Ended and expired sessions.
    pub const SESSION_ARCHIVE: &str = "session_archive";
    /// Temporal snapshots.
    pub const SNAPSHOTS: &str = "snapshots";
    /// Quantum branches.
    pub const QUANTUM_BRANCHES: &str = "quantum_branches";
}

/// Errors reported by the storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Update or delete of a missing key.
    #[error("no entry {key} in {collection}")]
    NotFound {
        /// Collection searched.
        collection: String,
        /// Missing key.
        key: String,
    },
    /// Value could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value persistence keyed by collection.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts or replaces `key` in `collection`.
    async fn store(&self, collection: &str, key: &str, value: Value) -> Result<(), StorageError>;

    /// Reads `key` from `collection`.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError>;

    /// Replaces an existing entry.
    async fn update(&self, collection: &str, key: &str, value: Value) -> Result<(), StorageError>;

    /// Removes an entry. Removing a missing entry is not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError>;
}

/// Storage kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    collections: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Whether `collection` holds no entries.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn store(&self, collection: &str, key: &str, value: Value) -> Result<(), StorageError> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn update(&self, collection: &str, key: &str, value: Value) -> Result<(), StorageError> {
        let mut collections = self.collections.write();
        let entry = collections
            .get_mut(collection)
            .and_then(|entries| entries.get_mut(key))
            .ok_or_else(|| StorageError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            })?;
        *entry = value;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        if let Some(entries) = self.collections.write().get_mut(collection) {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Serializes `value` and stores it, logging instead of failing.
///
/// Returns whether the write succeeded so callers can count failures.
pub async fn persist<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    collection: &str,
    key: &str,
    value: &T,
) -> bool {
    let result = match serde_json::to_value(value) {
        Ok(json) => storage.store(collection, key, json).await,
        Err(e) => Err(StorageError::from(e)),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(collection, key, error = %e, "Storage write failed; continuing in memory");
            false
        }
    }
}

/// Deletes `key`, logging instead of failing.
pub async fn forget(storage: &dyn Storage, collection: &str, key: &str) -> bool {
    match storage.delete(collection, key).await {
        Ok(()) => true,
        Err(e) => {
            warn!(collection, key, error = %e, "Storage delete failed; continuing in memory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_get_update_delete() -> Result<(), StorageError> {
        let storage = InMemoryStorage::new();
        storage.store("c", "k", json!({"v": 1})).await?;
        assert_eq!(storage.get("c", "k").await?, Some(json!({"v": 1})));

        storage.update("c", "k", json!({"v": 2})).await?;
        assert_eq!(storage.get("c", "k").await?, Some(json!({"v": 2})));

        storage.delete("c", "k").await?;
        assert_eq!(storage.get("c", "k").await?, None);
        assert!(storage.is_empty("c"));
        Ok(())
    }

    #[tokio::test]
    async fn update_missing_key_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage.update("c", "missing", json!(null)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    struct BrokenStorage;

    #[async_trait]
    impl Storage for BrokenStorage {
        async fn store(&self, _: &str, _: &str, _: Value) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        async fn get(&self, _: &str, _: &str) -> Result<Option<Value>, StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        async fn update(&self, _: &str, _: &str, _: Value) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn persist_reports_failure_without_error() {
        assert!(!persist(&BrokenStorage, "c", "k", &1_u32).await);
        assert!(!forget(&BrokenStorage, "c", "k").await);
        assert!(persist(&InMemoryStorage::new(), "c", "k", &1_u32).await);
    }
}
