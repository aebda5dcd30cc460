//! Tier adapter contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::entry::StoredEntry;
use crate::error::StorageFailure;

/// Prefix applied to every key written to the persistent and durable tiers,
/// so unrelated data sharing the same store is never touched
pub const STORAGE_KEY_PREFIX: &str = "strata:";

/// Namespaced key as written to a shared store
pub fn storage_key(key: &str) -> String {
    format!("{}{}", STORAGE_KEY_PREFIX, key)
}

/// The three storage tiers, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// Bounded in-process map
    Memory,
    /// Synchronous capacity-limited key-value store
    Persistent,
    /// Optional transactional store with tag and expiry indexes
    Durable,
}

impl TierKind {
    pub const ALL: [TierKind; 3] = [TierKind::Memory, TierKind::Persistent, TierKind::Durable];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Persistent => "persistent",
            TierKind::Durable => "durable",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier adapter trait
///
/// Every tier exposes the same operations and reports problems through
/// [`StorageFailure`]. Deleting an absent key is not a failure.
#[async_trait]
pub trait TierAdapter: Send + Sync {
    /// Which tier this adapter serves
    fn kind(&self) -> TierKind;

    /// Read an entry, expired or not
    async fn try_get(&self, key: &str) -> Result<Option<StoredEntry>, StorageFailure>;

    /// Write an entry, replacing any previous one for the key
    async fn try_put(&self, key: &str, entry: &StoredEntry) -> Result<(), StorageFailure>;

    /// Remove an entry
    async fn try_delete(&self, key: &str) -> Result<(), StorageFailure>;

    /// List every entry held by this tier
    async fn scan_all(&self) -> Result<Vec<(String, StoredEntry)>, StorageFailure>;

    /// Remove every entry whose tag set intersects `tags`
    async fn delete_by_tags(&self, tags: &BTreeSet<String>) -> Result<u64, StorageFailure> {
        let mut removed = 0;
        for (key, entry) in self.scan_all().await? {
            if entry.has_any_tag(tags) {
                self.try_delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every entry logically expired at `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageFailure> {
        let mut removed = 0;
        for (key, entry) in self.scan_all().await? {
            if entry.is_expired(now) {
                self.try_delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove everything this tier holds
    async fn clear(&self) -> Result<(), StorageFailure>;
}
