//! Durable tier adapter over the SQLite store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use strata_db::{Database, DbError, DurableRecord, DurableStats};
use tracing::warn;

use super::entry::StoredEntry;
use super::tier::{STORAGE_KEY_PREFIX, TierAdapter, TierKind, storage_key};
use crate::error::{FailureReason, StorageFailure};

/// Durable tier
///
/// Tag clears and expiry purges go through the database indexes rather
/// than scanning every row.
pub struct DurableTier {
    db: Database,
}

impl DurableTier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Row count and total size of the durable store
    pub async fn stats(&self) -> Result<DurableStats, StorageFailure> {
        self.db.get_durable_stats().await.map_err(Self::failure)
    }

    fn failure(err: DbError) -> StorageFailure {
        StorageFailure::from_db(TierKind::Durable, err)
    }

    fn corrupt(detail: impl Into<String>) -> StorageFailure {
        StorageFailure::new(TierKind::Durable, FailureReason::Corrupt, detail)
    }

    fn to_record(key: &str, entry: &StoredEntry) -> Result<DurableRecord, StorageFailure> {
        let data = serde_json::to_string(&entry.data).map_err(|e| {
            StorageFailure::new(TierKind::Durable, FailureReason::Serialization, e.to_string())
        })?;
        Ok(DurableRecord {
            key: storage_key(key),
            data,
            timestamp: entry.timestamp,
            ttl_ms: i64::try_from(entry.ttl.as_millis()).unwrap_or(i64::MAX),
            version: entry.version.clone(),
            tags: entry.tags.iter().cloned().collect(),
            size: i64::try_from(entry.size).unwrap_or(i64::MAX),
        })
    }

    fn from_record(record: DurableRecord) -> Result<StoredEntry, StorageFailure> {
        let data = serde_json::from_str(&record.data)
            .map_err(|e| Self::corrupt(format!("{}: {}", record.key, e)))?;
        let ttl_ms = u64::try_from(record.ttl_ms)
            .map_err(|_| Self::corrupt(format!("{}: negative ttl", record.key)))?;
        let size = u64::try_from(record.size)
            .map_err(|_| Self::corrupt(format!("{}: negative size", record.key)))?;

        Ok(StoredEntry {
            data,
            timestamp: record.timestamp,
            ttl: Duration::from_millis(ttl_ms),
            version: record.version,
            tags: record.tags.into_iter().collect(),
            size,
        })
    }
}

#[async_trait]
impl TierAdapter for DurableTier {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn try_get(&self, key: &str) -> Result<Option<StoredEntry>, StorageFailure> {
        match self
            .db
            .get_entry(&storage_key(key))
            .await
            .map_err(Self::failure)?
        {
            Some(record) => Self::from_record(record).map(Some),
            None => Ok(None),
        }
    }

    async fn try_put(&self, key: &str, entry: &StoredEntry) -> Result<(), StorageFailure> {
        let record = Self::to_record(key, entry)?;
        self.db.put_entry(&record).await.map_err(Self::failure)
    }

    async fn try_delete(&self, key: &str) -> Result<(), StorageFailure> {
        self.db
            .delete_entry(&storage_key(key))
            .await
            .map(|_| ())
            .map_err(Self::failure)
    }

    /// Undecodable rows found while scanning are removed and skipped
    async fn scan_all(&self) -> Result<Vec<(String, StoredEntry)>, StorageFailure> {
        let (records, mut corrupt) = self.db.list_entries().await.map_err(Self::failure)?;

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let Some(key) = record.key.strip_prefix(STORAGE_KEY_PREFIX).map(str::to_string) else {
                continue;
            };
            let namespaced = record.key.clone();
            match Self::from_record(record) {
                Ok(entry) => entries.push((key, entry)),
                Err(_) => corrupt.push(namespaced),
            }
        }

        for key in corrupt {
            warn!("Removing corrupt durable entry {}", key);
            self.db.delete_entry(&key).await.map_err(Self::failure)?;
        }
        Ok(entries)
    }

    async fn delete_by_tags(&self, tags: &BTreeSet<String>) -> Result<u64, StorageFailure> {
        let tags: Vec<String> = tags.iter().cloned().collect();
        self.db.delete_by_tags(&tags).await.map_err(Self::failure)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageFailure> {
        self.db.delete_expired(now).await.map_err(Self::failure)
    }

    async fn clear(&self) -> Result<(), StorageFailure> {
        self.db.clear_entries().await.map(|_| ()).map_err(Self::failure)
    }
}
