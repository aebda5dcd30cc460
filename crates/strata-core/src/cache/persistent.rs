//! Persistent tier adapter over a synchronous key-value store

use async_trait::async_trait;
use std::sync::Arc;
use strata_storage::KeyValueStore;
use tracing::warn;

use super::entry::StoredEntry;
use super::tier::{STORAGE_KEY_PREFIX, TierAdapter, TierKind, storage_key};
use crate::error::{FailureReason, StorageFailure};

/// Persistent tier
///
/// Entries are stored as JSON strings under namespaced keys. Keys without
/// the namespace prefix belong to someone else and are never read, scanned
/// or cleared.
pub struct PersistentTier {
    store: Arc<dyn KeyValueStore>,
}

impl PersistentTier {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Bytes in use in the underlying store (including foreign keys)
    pub fn used_bytes(&self) -> u64 {
        self.store.used_bytes()
    }

    /// Capacity of the underlying store
    pub fn capacity(&self) -> u64 {
        self.store.capacity()
    }

    fn failure(err: strata_storage::StorageError) -> StorageFailure {
        StorageFailure::from_storage(TierKind::Persistent, err)
    }

    fn decode(raw: &str) -> Result<StoredEntry, StorageFailure> {
        serde_json::from_str(raw).map_err(|e| {
            StorageFailure::new(TierKind::Persistent, FailureReason::Corrupt, e.to_string())
        })
    }

    /// Cache keys (prefix stripped) currently in the store
    fn cache_keys(&self) -> Result<Vec<String>, StorageFailure> {
        Ok(self
            .store
            .keys()
            .map_err(Self::failure)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(STORAGE_KEY_PREFIX).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl TierAdapter for PersistentTier {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn try_get(&self, key: &str) -> Result<Option<StoredEntry>, StorageFailure> {
        match self.store.get_item(&storage_key(key)).map_err(Self::failure)? {
            Some(raw) => Self::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn try_put(&self, key: &str, entry: &StoredEntry) -> Result<(), StorageFailure> {
        let raw = serde_json::to_string(entry).map_err(|e| {
            StorageFailure::new(TierKind::Persistent, FailureReason::Serialization, e.to_string())
        })?;
        self.store
            .set_item(&storage_key(key), &raw)
            .map_err(Self::failure)
    }

    async fn try_delete(&self, key: &str) -> Result<(), StorageFailure> {
        self.store
            .remove_item(&storage_key(key))
            .map(|_| ())
            .map_err(Self::failure)
    }

    /// Corrupt values found while scanning are removed and skipped
    async fn scan_all(&self) -> Result<Vec<(String, StoredEntry)>, StorageFailure> {
        let mut entries = Vec::new();
        for key in self.cache_keys()? {
            let namespaced = storage_key(&key);
            let Some(raw) = self.store.get_item(&namespaced).map_err(Self::failure)? else {
                continue;
            };
            match Self::decode(&raw) {
                Ok(entry) => entries.push((key, entry)),
                Err(failure) => {
                    warn!("Removing corrupt persistent entry {}: {}", key, failure.detail);
                    self.store.remove_item(&namespaced).map_err(Self::failure)?;
                }
            }
        }
        Ok(entries)
    }

    async fn clear(&self) -> Result<(), StorageFailure> {
        for key in self.cache_keys()? {
            self.store
                .remove_item(&storage_key(&key))
                .map_err(Self::failure)?;
        }
        Ok(())
    }
}
