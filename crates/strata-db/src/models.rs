//! Database models

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

/// A cache entry as persisted in the durable store
///
/// `data` holds the JSON-encoded payload; the durable layer never looks
/// inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub key: String,
    pub data: String,
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: i64,
    pub version: String,
    pub tags: Vec<String>,
    pub size: i64,
}

impl DurableRecord {
    /// Instant after which the record is logically expired
    ///
    /// Saturates at the latest representable instant for very long ttls.
    pub fn expires_at(&self) -> DateTime<Utc> {
        TimeDelta::try_milliseconds(self.ttl_ms)
            .and_then(|ttl| self.timestamp.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// ==================== TryFrom Implementations ====================

/// Builds a record without tags; callers attach them from `cache_entry_tags`.
impl TryFrom<&sqlx::sqlite::SqliteRow> for DurableRecord {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let timestamp_ms: i64 = row.try_get("timestamp")?;
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
            sqlx::Error::Decode(format!("timestamp out of range: {}", timestamp_ms).into())
        })?;

        Ok(DurableRecord {
            key: row.try_get("key")?,
            data: row.try_get("data")?,
            timestamp,
            ttl_ms: row.try_get("ttl_ms")?,
            version: row.try_get("version")?,
            tags: Vec::new(),
            size: row.try_get("size")?,
        })
    }
}
