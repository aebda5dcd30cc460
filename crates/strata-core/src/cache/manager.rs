//! Cache manager implementation

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strata_db::utils::format_bytes;
use strata_db::{Database, DurableStats};
use strata_storage::{KeyValueStore, LocalStore, SessionStore};
use tracing::{debug, info, warn};

use super::durable::DurableTier;
use super::entry::{CacheEntry, Clock, StoredEntry, estimate_size};
use super::memory::MemoryTier;
use super::persistent::PersistentTier;
use super::scheduler::CleanupScheduler;
use super::stats::{CacheStats, StatsCollector};
use super::tier::{TierAdapter, TierKind};
use crate::config::CacheConfig;
use crate::error::{CoreError, FailureReason, StorageFailure};

struct CacheInner {
    config: CacheConfig,
    memory: MemoryTier,
    persistent: PersistentTier,
    durable: Option<DurableTier>,
    durable_enabled: AtomicBool,
    clock: Clock,
    stats: StatsCollector,
    scheduler: Mutex<Option<CleanupScheduler>>,
}

/// Tiered cache manager
///
/// Cheap to clone; clones share the same tiers. No operation returns an
/// error: tier failures are logged, counted and absorbed. The background
/// cleanup task stops on [`CacheManager::shutdown`] or when the last clone
/// is dropped.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheInner>,
}

impl CacheManager {
    /// Build a manager from configuration alone
    ///
    /// A durable database that cannot be opened disables the durable tier
    /// instead of failing.
    pub async fn open(config: CacheConfig) -> Result<Self, CoreError> {
        let config = config.validated();

        let store: Arc<dyn KeyValueStore> = match &config.persistent_path {
            Some(path) => {
                info!("Using local persistent store at {}", path);
                Arc::new(LocalStore::open(path, config.max_persistent_size)?)
            }
            None => Arc::new(SessionStore::new(config.max_persistent_size)),
        };

        let durable = if config.enable_durable_tier {
            match Database::new(&config.durable_url).await {
                Ok(db) => Some(db),
                Err(e) => {
                    warn!("Durable tier unavailable, continuing without it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::new(config, store, durable))
    }

    /// Build a manager over injected backends
    ///
    /// Must be called inside a tokio runtime; the cleanup task is spawned
    /// immediately.
    pub fn new(
        config: CacheConfig,
        persistent_store: Arc<dyn KeyValueStore>,
        durable_db: Option<Database>,
    ) -> Self {
        let config = config.validated();
        let durable = durable_db
            .filter(|_| config.enable_durable_tier)
            .map(DurableTier::new);

        info!(
            "Initializing cache manager (memory: {}, persistent: {}, durable: {}, default ttl: {}s)",
            format_bytes(config.max_memory_size),
            format_bytes(persistent_store.capacity()),
            if durable.is_some() { "enabled" } else { "disabled" },
            config.default_ttl_secs
        );

        let inner = Arc::new(CacheInner {
            memory: MemoryTier::new(config.max_memory_size),
            persistent: PersistentTier::new(persistent_store),
            durable_enabled: AtomicBool::new(durable.is_some()),
            durable,
            clock: Clock::new(),
            stats: StatsCollector::new(),
            scheduler: Mutex::new(None),
            config,
        });

        let weak = Arc::downgrade(&inner);
        let scheduler = CleanupScheduler::spawn(inner.config.cleanup_interval(), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => CacheManager { inner }.purge_expired().await,
                    None => 0,
                }
            }
        });
        *inner.scheduler.lock() = Some(scheduler);

        Self { inner }
    }

    /// Effective configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get a value, falling through Memory, Persistent and Durable
    ///
    /// A hit in a slower tier is copied into every faster tier that admits
    /// it, keeping the original timestamp and ttl.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.inner.clock.now();
        let tiers = self.tiers();

        for (index, tier) in tiers.iter().enumerate() {
            let kind = tier.kind();
            let entry = match tier.try_get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.inner.stats.record_miss(kind);
                    continue;
                }
                Err(failure) => {
                    let corrupt = failure.reason == FailureReason::Corrupt;
                    self.handle_failure(failure);
                    if corrupt {
                        self.delete_from(*tier, key).await;
                    }
                    self.inner.stats.record_miss(kind);
                    continue;
                }
            };

            if entry.is_expired(now) {
                debug!("Expired {} entry: {}", kind, key);
                self.inner.stats.record_miss(kind);
                self.inner.stats.record_expired(1);
                self.delete_from(*tier, key).await;
                continue;
            }

            let value = match serde_json::from_value::<T>(entry.data.clone()) {
                Ok(value) => value,
                Err(e) => {
                    self.handle_failure(StorageFailure::new(
                        kind,
                        FailureReason::Corrupt,
                        format!("{}: {}", key, e),
                    ));
                    self.inner.stats.record_miss(kind);
                    self.delete_from(*tier, key).await;
                    continue;
                }
            };

            self.inner.stats.record_hit(kind);
            debug!("Cache hit in {} tier: {}", kind, key);
            if index > 0 {
                self.promote(key, &entry, &tiers[..index]).await;
            }
            return Some(value);
        }

        None
    }

    /// Store a value in every tier that admits it
    ///
    /// A zero or missing ttl falls back to the configured default. Tiers
    /// that skip or fail the write drop their previous entry for the key.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
        tags: &[&str],
    ) {
        let tiers = self.tiers();

        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping unserializable value for {}: {}", key, e);
                for tier in &tiers {
                    self.handle_failure(StorageFailure::new(
                        tier.kind(),
                        FailureReason::Serialization,
                        e.to_string(),
                    ));
                    self.delete_from(*tier, key).await;
                }
                return;
            }
        };

        let ttl = match ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            Some(_) => {
                warn!("Zero ttl for {}, using default", key);
                self.inner.config.default_ttl()
            }
            None => self.inner.config.default_ttl(),
        };

        let size = estimate_size(data);
        let tags: BTreeSet<String> = tags.iter().map(|tag| tag.to_string()).collect();
        let entry = CacheEntry::new(value, self.inner.clock.now(), ttl, tags, size);

        debug!("Caching {} ({} bytes, ttl {:?})", key, size, ttl);

        for tier in &tiers {
            if !self.admits(tier.kind(), size) {
                debug!("{} bytes over {} tier item budget: {}", size, tier.kind(), key);
                self.delete_from(*tier, key).await;
            } else if !self.write_tier(*tier, key, &entry).await {
                self.delete_from(*tier, key).await;
            }
        }
    }

    /// Delete a key from every tier
    pub async fn delete(&self, key: &str) {
        debug!("Deleting cache entry: {}", key);
        for tier in self.tiers() {
            self.delete_from(tier, key).await;
        }
    }

    /// Remove every entry whose tags intersect `tags`
    ///
    /// Returns the number of copies removed across all tiers.
    pub async fn clear_by_tags(&self, tags: &[&str]) -> u64 {
        if tags.is_empty() {
            return 0;
        }

        let tags: BTreeSet<String> = tags.iter().map(|tag| tag.to_string()).collect();
        let mut removed = 0;
        for tier in self.tiers() {
            match tier.delete_by_tags(&tags).await {
                Ok(count) => removed += count,
                Err(failure) => self.handle_failure(failure),
            }
        }

        info!("Cleared {} cache entries tagged {:?}", removed, tags);
        removed
    }

    /// Wipe all tiers
    ///
    /// Only cache-owned keys are removed from the persistent store.
    pub async fn clear(&self) {
        info!("Clearing all cache tiers");
        for tier in self.tiers() {
            if let Err(failure) = tier.clear().await {
                self.handle_failure(failure);
            }
        }
    }

    /// Remove entries expired as of now from every tier
    ///
    /// A failure on one tier does not stop the others. Returns the number
    /// of entries removed.
    pub async fn purge_expired(&self) -> u64 {
        let now = self.inner.clock.now();
        let mut removed = 0;

        for tier in self.tiers() {
            match tier.purge_expired(now).await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Purged {} expired {} entries", count, tier.kind());
                    }
                    removed += count;
                }
                Err(failure) => self.handle_failure(failure),
            }
        }

        self.inner.stats.record_expired(removed);
        removed
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.inner
            .stats
            .snapshot(&self.inner.memory, self.durable().is_some())
    }

    /// Row count and total size of the durable tier, if enabled
    pub async fn durable_stats(&self) -> Option<DurableStats> {
        let durable = self.durable()?;
        match durable.stats().await {
            Ok(stats) => Some(stats),
            Err(failure) => {
                self.handle_failure(failure);
                None
            }
        }
    }

    /// Whether the background cleanup task is running
    pub fn is_cleanup_running(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(CleanupScheduler::is_running)
    }

    /// Stop the background cleanup task and wait for it to exit
    pub async fn shutdown(&self) {
        let scheduler = self.inner.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
            info!("Cache manager shut down");
        }
    }

    fn durable(&self) -> Option<&DurableTier> {
        self.inner
            .durable
            .as_ref()
            .filter(|_| self.inner.durable_enabled.load(Ordering::Acquire))
    }

    /// Active tiers, fastest first
    fn tiers(&self) -> Vec<&dyn TierAdapter> {
        let mut tiers: Vec<&dyn TierAdapter> = vec![&self.inner.memory, &self.inner.persistent];
        if let Some(durable) = self.durable() {
            tiers.push(durable);
        }
        tiers
    }

    /// Per-item admission budget
    fn admits(&self, tier: TierKind, size: u64) -> bool {
        match tier {
            TierKind::Memory => size <= self.inner.config.memory_item_budget(),
            TierKind::Persistent => size <= self.inner.config.persistent_item_budget(),
            TierKind::Durable => true,
        }
    }

    /// Write one tier; a full persistent store is purged once and retried
    async fn write_tier(&self, tier: &dyn TierAdapter, key: &str, entry: &StoredEntry) -> bool {
        let failure = match tier.try_put(key, entry).await {
            Ok(()) => return true,
            Err(failure) => failure,
        };

        let retry = failure.tier == TierKind::Persistent
            && failure.reason == FailureReason::QuotaExceeded;
        self.handle_failure(failure);
        if !retry {
            return false;
        }

        match tier.purge_expired(self.inner.clock.now()).await {
            Ok(count) => self.inner.stats.record_expired(count),
            Err(failure) => self.handle_failure(failure),
        }

        match tier.try_put(key, entry).await {
            Ok(()) => {
                debug!("Stored {} after purging persistent tier", key);
                true
            }
            Err(failure) => {
                self.handle_failure(failure);
                false
            }
        }
    }

    async fn promote(&self, key: &str, entry: &StoredEntry, faster: &[&dyn TierAdapter]) {
        for tier in faster {
            if !self.admits(tier.kind(), entry.size) {
                continue;
            }
            if self.write_tier(*tier, key, entry).await {
                self.inner.stats.record_promotion(tier.kind());
                debug!("Promoted {} into {} tier", key, tier.kind());
            }
        }
    }

    async fn delete_from(&self, tier: &dyn TierAdapter, key: &str) {
        if let Err(failure) = tier.try_delete(key).await {
            self.handle_failure(failure);
        }
    }

    fn handle_failure(&self, failure: StorageFailure) {
        self.inner.stats.record_failure(&failure);

        match failure.reason {
            FailureReason::Unsupported if failure.tier == TierKind::Durable => {
                if self.inner.durable_enabled.swap(false, Ordering::AcqRel) {
                    warn!("Disabling durable tier: {}", failure);
                }
            }
            FailureReason::QuotaExceeded => debug!("{}", failure),
            _ => warn!("{}", failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde::Deserialize;
    use serde_json::{Value, json};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    async fn manager_with(
        config: CacheConfig,
        capacity: u64,
    ) -> (CacheManager, Arc<SessionStore>, Database) {
        let store = Arc::new(SessionStore::new(capacity));
        let db = Database::in_memory().await.unwrap();
        let manager = CacheManager::new(config, store.clone(), Some(db.clone()));
        (manager, store, db)
    }

    async fn manager() -> CacheManager {
        manager_with(CacheConfig::default(), 1024 * 1024).await.0
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = manager().await;
        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };

        cache.set("profile:1", &profile, None, &[]).await;
        assert_eq!(cache.get::<Profile>("profile:1").await, Some(profile));
        assert_eq!(cache.get::<Profile>("profile:2").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits.memory, 1);
        assert_eq!(stats.count, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = manager().await;

        cache
            .set("a", &json!({"x": 1}), Some(Duration::from_millis(1000)), &["tagA"])
            .await;
        assert_eq!(cache.get::<Value>("a").await, Some(json!({"x": 1})));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get::<Value>("a").await, None);

        // Expired copies are deleted on the failed read
        assert!(cache.inner.memory.get("a").is_none());
        assert!(cache.inner.persistent.try_get("a").await.unwrap().is_none());
        assert_eq!(cache.durable_stats().await.unwrap().entry_count, 0);
        assert_eq!(cache.stats().expired, 3);
    }

    #[tokio::test]
    async fn test_expired_durable_copy_is_deleted_on_read() {
        let (cache, _, db) = manager_with(CacheConfig::default(), 1024 * 1024).await;

        let stale = CacheEntry::new(
            json!("stale"),
            DateTime::from_timestamp_millis(1_000).unwrap(),
            Duration::from_secs(1),
            BTreeSet::new(),
            7,
        );
        let durable = DurableTier::new(db);
        durable.try_put("k", &stale).await.unwrap();

        assert_eq!(cache.get::<String>("k").await, None);
        assert!(durable.try_get("k").await.unwrap().is_none());
        assert!(cache.inner.memory.get("k").is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses.durable, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.promotions, 0);
    }

    #[tokio::test]
    async fn test_very_long_ttl_is_stored() {
        let (cache, _, db) = manager_with(CacheConfig::default(), 1024 * 1024).await;

        let ttl = Duration::from_secs(365 * 24 * 3600 * 1_000_000);
        cache.set("k", "v", Some(ttl), &[]).await;
        cache.set("max", "m", Some(Duration::from_secs(u64::MAX)), &[]).await;

        assert_eq!(cache.get::<String>("k").await, Some("v".to_string()));
        assert_eq!(cache.durable_stats().await.unwrap().entry_count, 2);
        assert_eq!(cache.stats().failures, 0);

        let durable = DurableTier::new(db);
        assert!(durable.try_get("max").await.unwrap().is_some());
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let cache = manager().await;
        cache.set("k", "v", Some(Duration::ZERO), &[]).await;

        let entry = cache.inner.memory.get("k").unwrap();
        assert_eq!(entry.ttl, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_fifo_eviction_keeps_newest_five() {
        // Items like {"n":1} are 7 bytes; memory holds exactly five
        let config = CacheConfig {
            max_memory_size: 35,
            memory_item_fraction: 1,
            max_persistent_size: 0,
            enable_durable_tier: false,
            ..Default::default()
        };
        let cache = CacheManager::new(config, Arc::new(SessionStore::new(1024)), None);

        for n in 1..=6 {
            cache.set(&format!("item{}", n), &json!({"n": n}), None, &[]).await;
        }

        assert_eq!(cache.get::<Value>("item1").await, None);
        for n in 2..=6 {
            assert_eq!(
                cache.get::<Value>(&format!("item{}", n)).await,
                Some(json!({"n": n}))
            );
        }

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.count, 5);
        assert!(stats.size <= 35);
    }

    #[tokio::test]
    async fn test_clear_by_tags() {
        let cache = manager().await;
        let ttl = Some(Duration::from_millis(500));

        cache.set("b", "v", ttl, &["x", "y"]).await;
        cache.set("c", "v2", ttl, &["y"]).await;
        cache.clear_by_tags(&["x"]).await;

        assert_eq!(cache.get::<String>("b").await, None);
        assert_eq!(cache.get::<String>("c").await, Some("v2".to_string()));

        assert_eq!(cache.clear_by_tags(&[]).await, 0);
        assert_eq!(cache.get::<String>("c").await, Some("v2".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_bound_under_concurrent_writers() {
        let config = CacheConfig {
            max_memory_size: 500,
            memory_item_fraction: 2,
            enable_durable_tier: false,
            ..Default::default()
        };
        let cache = CacheManager::new(config, Arc::new(SessionStore::new(1024 * 1024)), None);

        let mut handles = Vec::new();
        for writer in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..50 {
                    let key = format!("w{}:{}", writer, n % 10);
                    cache.set(&key, &"x".repeat((writer * 7 + n) % 200), None, &[]).await;
                    assert!(cache.stats().size <= 500);
                    if n % 5 == 0 {
                        cache.delete(&key).await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let resident = cache.inner.memory.scan_all().await.unwrap();
        let resident_size: u64 = resident.iter().map(|(_, entry)| entry.size).sum();
        let stats = cache.stats();
        assert!(stats.size <= 500);
        assert_eq!(stats.size, resident_size);
        assert_eq!(stats.count, resident.len() as u64);
    }

    #[tokio::test]
    async fn test_memory_bound() {
        let config = CacheConfig {
            max_memory_size: 200,
            memory_item_fraction: 2,
            ..Default::default()
        };
        let (cache, _, _) = manager_with(config, 1024 * 1024).await;

        for n in 0..50 {
            cache.set(&format!("k{}", n), &"x".repeat(n % 120), None, &[]).await;
            assert!(cache.stats().size <= 200);
        }

        // Over the per-item budget: skipped in memory, still readable below
        let big = "y".repeat(150);
        cache.set("big", &big, None, &[]).await;
        assert!(cache.inner.memory.get("big").is_none());
        assert_eq!(cache.get::<String>("big").await, Some(big));
    }

    #[tokio::test]
    async fn test_promotion_is_idempotent() {
        let (cache, _, db) = manager_with(CacheConfig::default(), 1024 * 1024).await;

        let entry = CacheEntry::new(
            json!("durable only"),
            cache.inner.clock.now(),
            Duration::from_secs(60),
            BTreeSet::new(),
            14,
        );
        DurableTier::new(db).try_put("k", &entry).await.unwrap();

        assert_eq!(cache.get::<String>("k").await, Some("durable only".to_string()));
        assert_eq!(cache.get::<String>("k").await, Some("durable only".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.hits.durable, 1);
        assert_eq!(stats.hits.memory, 1);
        assert_eq!(stats.promotions, 2);

        // Promoted copies keep the original timestamp and ttl
        let promoted = cache.inner.memory.get("k").unwrap();
        assert_eq!(promoted.timestamp, entry.timestamp);
        assert_eq!(promoted.ttl, entry.ttl);
        let persisted = cache.inner.persistent.try_get("k").await.unwrap().unwrap();
        assert_eq!(persisted.timestamp, entry.timestamp);
    }

    #[tokio::test]
    async fn test_persistent_quota_purges_and_retries() {
        let config = CacheConfig {
            persistent_item_fraction: 1,
            enable_durable_tier: false,
            ..Default::default()
        };
        let store = Arc::new(SessionStore::new(300));
        let cache = CacheManager::new(config, store.clone(), None);

        cache
            .set("old", &"o".repeat(100), Some(Duration::from_millis(1)), &[])
            .await;
        assert!(store.get_item("strata:old").unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set("new", &"n".repeat(100), None, &[]).await;

        assert!(store.get_item("strata:old").unwrap().is_none());
        assert!(store.get_item("strata:new").unwrap().is_some());
        assert!(cache.stats().failures >= 1);
    }

    #[tokio::test]
    async fn test_failed_write_clears_stale_copy() {
        let config = CacheConfig {
            persistent_item_fraction: 1,
            enable_durable_tier: false,
            ..Default::default()
        };
        let store = Arc::new(SessionStore::new(300));
        let cache = CacheManager::new(config, store.clone(), None);

        cache.set("k", "small", None, &[]).await;
        assert!(store.get_item("strata:k").unwrap().is_some());

        // Too large for the store even after purging
        cache.set("k", &"z".repeat(400), None, &[]).await;
        assert!(store.get_item("strata:k").unwrap().is_none());
        assert_eq!(cache.get::<String>("k").await, Some("z".repeat(400)));
    }

    #[tokio::test]
    async fn test_corrupt_persistent_value_is_a_miss() {
        let (cache, store, _) = manager_with(CacheConfig::default(), 1024 * 1024).await;
        store.set_item("strata:k", "{not json").unwrap();

        assert_eq!(cache.get::<Value>("k").await, None);
        assert!(store.get_item("strata:k").unwrap().is_none());
        assert_eq!(cache.stats().misses.persistent, 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_treated_as_corrupt() {
        let cache = manager().await;
        cache.set("k", "text", None, &[]).await;

        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn test_unserializable_value_deletes_key() {
        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("broken"))
            }
        }

        let cache = manager().await;
        cache.set("k", "old", None, &[]).await;
        cache.set("k", &Broken, None, &[]).await;

        assert_eq!(cache.get::<String>("k").await, None);
        assert_eq!(cache.stats().failures, 3);
    }

    #[tokio::test]
    async fn test_durable_disabled_after_pool_closed() {
        let (cache, _, db) = manager_with(CacheConfig::default(), 1024 * 1024).await;
        assert!(cache.stats().durable_enabled);

        db.close().await;
        cache.set("k", "v", None, &[]).await;

        assert!(!cache.stats().durable_enabled);
        assert!(cache.durable_stats().await.is_none());
        assert_eq!(cache.get::<String>("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_without_durable_tier() {
        let config = CacheConfig {
            enable_durable_tier: false,
            ..Default::default()
        };
        let cache = CacheManager::new(config, Arc::new(SessionStore::new(1024)), None);

        cache.set("k", &42u32, None, &["t"]).await;
        assert_eq!(cache.get::<u32>("k").await, Some(42));
        assert_eq!(cache.clear_by_tags(&["t"]).await, 2);
        assert!(!cache.stats().durable_enabled);
        assert!(cache.durable_stats().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (cache, store, _) = manager_with(CacheConfig::default(), 1024 * 1024).await;
        store.set_item("foreign", "keep").unwrap();

        cache.set("a", "1", None, &[]).await;
        cache.set("b", "2", None, &[]).await;
        cache.delete("a").await;
        cache.delete("missing").await;
        assert_eq!(cache.get::<String>("a").await, None);

        cache.clear().await;
        assert_eq!(cache.get::<String>("b").await, None);
        assert_eq!(store.get_item("foreign").unwrap(), Some("keep".to_string()));
        assert_eq!(cache.durable_stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_purge_expired_all_tiers() {
        let (cache, _, _) = manager_with(CacheConfig::default(), 1024 * 1024).await;

        cache.set("short", "s", Some(Duration::from_millis(5)), &[]).await;
        cache.set("long", "l", None, &[]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired().await, 3);
        assert_eq!(cache.stats().count, 1);
        assert_eq!(cache.durable_stats().await.unwrap().entry_count, 1);
        assert_eq!(cache.get::<String>("long").await, Some("l".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_stops_cleanup() {
        let cache = manager().await;
        assert!(cache.is_cleanup_running());

        cache.shutdown().await;
        assert!(!cache.is_cleanup_running());

        // Still usable after shutdown
        cache.set("k", "v", None, &[]).await;
        assert_eq!(cache.get::<String>("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_open_with_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            persistent_path: Some(dir.path().join("persistent").display().to_string()),
            durable_url: format!("sqlite:{}?mode=rwc", dir.path().join("cache.db").display()),
            ..Default::default()
        };

        let cache = CacheManager::open(config.clone()).await.unwrap();
        cache.set("k", &json!({"a": [1, 2]}), None, &["t"]).await;
        cache.shutdown().await;
        drop(cache);

        // A fresh manager sees the persistent and durable copies
        let cache = CacheManager::open(config).await.unwrap();
        assert_eq!(cache.get::<Value>("k").await, Some(json!({"a": [1, 2]})));
        assert_eq!(cache.stats().hits.persistent, 1);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_survives_bad_durable_url() {
        let config = CacheConfig {
            durable_url: "sqlite:/nonexistent-dir/strata/cache.db".to_string(),
            ..Default::default()
        };
        let cache = CacheManager::open(config).await.unwrap();
        assert!(!cache.stats().durable_enabled);
        cache.shutdown().await;
    }
}
