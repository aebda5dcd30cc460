//! Cache entry model and size estimation

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Schema tag written with every entry
pub const ENTRY_VERSION: &str = "1";

/// Size assumed for a value that cannot be serialized
const FALLBACK_ENTRY_SIZE: u64 = 1024;

/// A cached value with its expiry and tag metadata
///
/// Entries are never mutated in place; every write replaces the previous
/// entry for the key in that tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, millisecond precision
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub ttl: Duration,
    pub version: String,
    pub tags: BTreeSet<String>,
    /// Estimated footprint in bytes
    pub size: u64,
}

/// Entry form shared by all tiers
pub type StoredEntry = CacheEntry<serde_json::Value>;

impl<T> CacheEntry<T> {
    pub fn new(
        data: T,
        timestamp: DateTime<Utc>,
        ttl: Duration,
        tags: BTreeSet<String>,
        size: u64,
    ) -> Self {
        Self {
            data,
            timestamp,
            ttl,
            version: ENTRY_VERSION.to_string(),
            tags,
            size,
        }
    }

    fn ttl_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX)
    }

    /// Instant after which the entry is logically expired
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.timestamp
            .checked_add_signed(self.ttl_delta())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Logically expired iff `now - timestamp > ttl`, whether or not the
    /// entry has been purged yet
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) > self.ttl_delta()
    }

    /// Whether the tag set intersects `tags`
    pub fn has_any_tag(&self, tags: &BTreeSet<String>) -> bool {
        !self.tags.is_disjoint(tags)
    }
}

/// Estimate the storage footprint of a value
///
/// Uses the length of its JSON encoding; a value that fails to serialize is
/// given a conservative heuristic size instead. Never fails.
pub fn estimate_size<T: Serialize + ?Sized>(data: &T) -> u64 {
    match serde_json::to_vec(data) {
        Ok(encoded) => encoded.len() as u64,
        Err(_) => (std::mem::size_of_val(data) as u64).max(FALLBACK_ENTRY_SIZE),
    }
}

/// Wall clock that never runs backwards
///
/// Timestamps are truncated to milliseconds so they survive a round trip
/// through every tier unchanged.
#[derive(Debug, Default)]
pub struct Clock {
    last_ms: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_millis();
        let previous = self.last_ms.fetch_max(wall, Ordering::SeqCst);
        DateTime::from_timestamp_millis(previous.max(wall)).unwrap_or_else(Utc::now)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_expiry_is_strictly_after_ttl() {
        let entry = CacheEntry::new(
            json!(1),
            at(10_000),
            Duration::from_millis(1000),
            tags(&[]),
            1,
        );

        assert!(!entry.is_expired(at(10_000)));
        assert!(!entry.is_expired(at(11_000)));
        assert!(entry.is_expired(at(11_001)));
        assert_eq!(entry.expires_at(), at(11_000));
    }

    #[test]
    fn test_has_any_tag() {
        let entry = CacheEntry::new(
            json!(null),
            at(0),
            Duration::from_secs(1),
            tags(&["x", "y"]),
            4,
        );

        assert!(entry.has_any_tag(&tags(&["y", "z"])));
        assert!(!entry.has_any_tag(&tags(&["z"])));
        assert!(!entry.has_any_tag(&tags(&[])));
        // Exact string match only
        assert!(!entry.has_any_tag(&tags(&["X"])));
    }

    #[test]
    fn test_serialized_form() {
        let entry = CacheEntry::new(
            json!({"x": 1}),
            at(1_700_000_000_123),
            Duration::from_millis(1500),
            tags(&["b", "a"]),
            7,
        );

        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            encoded,
            json!({
                "data": {"x": 1},
                "timestamp": 1_700_000_000_123i64,
                "ttl": 1500,
                "version": "1",
                "tags": ["a", "b"],
                "size": 7
            })
        );

        let decoded: StoredEntry = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_estimate_size() {
        assert_eq!(estimate_size(&json!({"x": 1})), 7);
        assert_eq!(estimate_size("abc"), 5);
        assert_eq!(estimate_size(&vec![0u8; 3]), 7);
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not serializable"))
        }
    }

    #[test]
    fn test_estimate_size_falls_back() {
        assert_eq!(estimate_size(&Unserializable), FALLBACK_ENTRY_SIZE);
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= previous);
            previous = now;
        }
        assert_eq!(previous.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
