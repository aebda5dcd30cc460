//! Cache entry operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;

use crate::error::DbError;
use crate::models::DurableRecord;
use crate::repository::Database;

/// Aggregate figures for the durable store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DurableStats {
    pub entry_count: i64,
    pub total_size: i64,
    pub tag_count: i64,
}

/// Build `?, ?, ?` for an `IN (...)` clause
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Database {
    // ==================== Cache Entry Operations ====================

    /// Insert or replace an entry together with its tag set
    pub async fn put_entry(&self, record: &DurableRecord) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, data, timestamp, ttl_ms, expires_at, version, size)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                timestamp = excluded.timestamp,
                ttl_ms = excluded.ttl_ms,
                expires_at = excluded.expires_at,
                version = excluded.version,
                size = excluded.size
            "#,
        )
        .bind(&record.key)
        .bind(&record.data)
        .bind(record.timestamp.timestamp_millis())
        .bind(record.ttl_ms)
        .bind(record.expires_at().timestamp_millis())
        .bind(&record.version)
        .bind(record.size)
        .execute(&mut *tx)
        .await?;

        // Replace, never merge, the tag set
        sqlx::query("DELETE FROM cache_entry_tags WHERE key = ?")
            .bind(&record.key)
            .execute(&mut *tx)
            .await?;

        for tag in &record.tags {
            sqlx::query("INSERT OR IGNORE INTO cache_entry_tags (key, tag) VALUES (?, ?)")
                .bind(&record.key)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get an entry by key
    pub async fn get_entry(&self, key: &str) -> Result<Option<DurableRecord>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT key, data, timestamp, ttl_ms, version, size
            FROM cache_entries
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record =
            DurableRecord::try_from(&row).map_err(|e| DbError::Corrupt(e.to_string()))?;

        let tag_rows = sqlx::query("SELECT tag FROM cache_entry_tags WHERE key = ? ORDER BY tag")
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        record.tags = tag_rows.iter().map(|row| row.get("tag")).collect();

        Ok(Some(record))
    }

    /// Delete an entry and its tags
    pub async fn delete_entry(&self, key: &str) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cache_entry_tags WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// List every entry, oldest write first
    ///
    /// Rows that fail to decode are skipped; their keys are returned in the
    /// second element so the caller can remove them.
    pub async fn list_entries(&self) -> Result<(Vec<DurableRecord>, Vec<String>), DbError> {
        let rows = sqlx::query(
            r#"
            SELECT key, data, timestamp, ttl_ms, version, size
            FROM cache_entries
            ORDER BY timestamp ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let tag_rows = sqlx::query("SELECT key, tag FROM cache_entry_tags ORDER BY key, tag")
            .fetch_all(&self.pool)
            .await?;
        let mut tags: HashMap<String, Vec<String>> = HashMap::new();
        for row in &tag_rows {
            tags.entry(row.get("key")).or_default().push(row.get("tag"));
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in &rows {
            match DurableRecord::try_from(row) {
                Ok(mut record) => {
                    record.tags = tags.remove(&record.key).unwrap_or_default();
                    records.push(record);
                }
                Err(_) => corrupt.push(row.get("key")),
            }
        }

        Ok((records, corrupt))
    }

    /// Delete every entry carrying at least one of `tags`
    ///
    /// Uses the tag index; returns the number of entries removed.
    pub async fn delete_by_tags(&self, tags: &[String]) -> Result<u64, DbError> {
        if tags.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            DELETE FROM cache_entries
            WHERE key IN (SELECT DISTINCT key FROM cache_entry_tags WHERE tag IN ({}))
            "#,
            placeholders(tags.len())
        );
        let mut query = sqlx::query(&sql);
        for tag in tags {
            query = query.bind(tag);
        }
        let removed = query.execute(&mut *tx).await?.rows_affected();

        sqlx::query("DELETE FROM cache_entry_tags WHERE key NOT IN (SELECT key FROM cache_entries)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }

    /// Delete every entry whose expiry lies strictly before `now`
    ///
    /// Uses the expiry index; returns the number of entries removed.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM cache_entries WHERE expires_at < ?")
            .bind(now.timestamp_millis())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed > 0 {
            sqlx::query(
                "DELETE FROM cache_entry_tags WHERE key NOT IN (SELECT key FROM cache_entries)",
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Delete everything
    pub async fn clear_entries(&self) -> Result<u64, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cache_entry_tags")
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM cache_entries")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    /// Get durable store statistics
    pub async fn get_durable_stats(&self) -> Result<DurableStats, DbError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count, COALESCE(SUM(size), 0) as total FROM cache_entries",
        )
        .fetch_one(&self.pool)
        .await?;

        let tag_count: i64 =
            sqlx::query("SELECT COUNT(DISTINCT tag) as count FROM cache_entry_tags")
                .fetch_one(&self.pool)
                .await?
                .get("count");

        Ok(DurableStats {
            entry_count: row.get("count"),
            total_size: row.get("total"),
            tag_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, timestamp_ms: i64, ttl_ms: i64, tags: &[&str]) -> DurableRecord {
        DurableRecord {
            key: key.to_string(),
            data: format!("{{\"key\":\"{}\"}}", key),
            timestamp: DateTime::from_timestamp_millis(timestamp_ms).unwrap(),
            ttl_ms,
            version: "1".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            size: 12,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let db = Database::in_memory().await.unwrap();
        let rec = record("a", 1_000, 5_000, &["x", "y"]);

        db.put_entry(&rec).await.unwrap();
        assert_eq!(db.get_entry("a").await.unwrap(), Some(rec));

        assert!(db.delete_entry("a").await.unwrap());
        assert!(!db.delete_entry("a").await.unwrap());
        assert_eq!(db.get_entry("a").await.unwrap(), None);

        let stats = db.get_durable_stats().await.unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.tag_count, 0);
    }

    #[tokio::test]
    async fn test_put_replaces_tags() {
        let db = Database::in_memory().await.unwrap();
        db.put_entry(&record("a", 1_000, 5_000, &["x", "y"]))
            .await
            .unwrap();
        db.put_entry(&record("a", 2_000, 5_000, &["z"])).await.unwrap();

        let stored = db.get_entry("a").await.unwrap().unwrap();
        assert_eq!(stored.tags, vec!["z".to_string()]);
        assert_eq!(stored.timestamp.timestamp_millis(), 2_000);

        // The old tags no longer match
        assert_eq!(db.delete_by_tags(&["x".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_tags() {
        let db = Database::in_memory().await.unwrap();
        db.put_entry(&record("b", 1_000, 500, &["x", "y"])).await.unwrap();
        db.put_entry(&record("c", 1_000, 500, &["y"])).await.unwrap();
        db.put_entry(&record("d", 1_000, 500, &[])).await.unwrap();

        let removed = db.delete_by_tags(&["x".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_entry("b").await.unwrap().is_none());
        assert!(db.get_entry("c").await.unwrap().is_some());
        assert!(db.get_entry("d").await.unwrap().is_some());

        assert_eq!(db.delete_by_tags(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let db = Database::in_memory().await.unwrap();
        db.put_entry(&record("old", 1_000, 1_000, &["t"])).await.unwrap();
        db.put_entry(&record("edge", 1_000, 2_000, &[])).await.unwrap();
        db.put_entry(&record("new", 2_500, 1_000, &["t"])).await.unwrap();

        // "edge" expires exactly at 3_000, which is not yet past
        let now = DateTime::from_timestamp_millis(3_000).unwrap();
        assert_eq!(db.delete_expired(now).await.unwrap(), 1);

        let (records, corrupt) = db.list_entries().await.unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["edge", "new"]);
        assert!(corrupt.is_empty());
        assert_eq!(records[1].tags, vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let db = Database::in_memory().await.unwrap();
        db.put_entry(&record("a", 1_000, 1_000, &["t"])).await.unwrap();
        db.put_entry(&record("b", 1_000, 1_000, &["t", "u"])).await.unwrap();

        let stats = db.get_durable_stats().await.unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_size, 24);
        assert_eq!(stats.tag_count, 2);

        assert_eq!(db.clear_entries().await.unwrap(), 2);
        assert_eq!(db.get_durable_stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("cache.db").display());

        {
            let db = Database::new(&url).await.unwrap();
            db.put_entry(&record("a", 1_000, 1_000, &["t"])).await.unwrap();
            db.close().await;
        }

        let db = Database::new(&url).await.unwrap();
        assert!(db.get_entry("a").await.unwrap().is_some());
    }
}
