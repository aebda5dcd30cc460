//! Cache statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::memory::MemoryTier;
use super::tier::TierKind;
use crate::error::StorageFailure;

/// A counter per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub memory: u64,
    pub persistent: u64,
    pub durable: u64,
}

impl TierCounts {
    pub fn get(&self, tier: TierKind) -> u64 {
        match tier {
            TierKind::Memory => self.memory,
            TierKind::Persistent => self.persistent,
            TierKind::Durable => self.durable,
        }
    }

    pub fn total(&self) -> u64 {
        self.memory + self.persistent + self.durable
    }
}

/// Point-in-time statistics snapshot
///
/// `size` and `count` describe the memory tier only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: TierCounts,
    pub misses: TierCounts,
    pub size: u64,
    pub count: u64,
    pub max_size: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub expired: u64,
    pub failures: u64,
    pub durable_enabled: bool,
}

impl CacheStats {
    /// Fraction of `get` calls answered by some tier
    ///
    /// Every `get` ends in at most one hit, and a full miss records a miss
    /// on the last tier consulted, so hits over hits plus last-tier misses
    /// approximates the request hit rate.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.total();
        let last_tier = if self.durable_enabled {
            TierKind::Durable
        } else {
            TierKind::Persistent
        };
        let full_misses = self.misses.get(last_tier);
        if hits + full_misses == 0 {
            return 0.0;
        }
        hits as f64 / (hits + full_misses) as f64
    }
}

#[derive(Default)]
struct AtomicTierCounts {
    memory: AtomicU64,
    persistent: AtomicU64,
    durable: AtomicU64,
}

impl AtomicTierCounts {
    fn counter(&self, tier: TierKind) -> &AtomicU64 {
        match tier {
            TierKind::Memory => &self.memory,
            TierKind::Persistent => &self.persistent,
            TierKind::Durable => &self.durable,
        }
    }

    fn increment(&self, tier: TierKind) {
        self.counter(tier).fetch_add(1, Ordering::Relaxed);
    }

    fn load(&self) -> TierCounts {
        TierCounts {
            memory: self.memory.load(Ordering::Relaxed),
            persistent: self.persistent.load(Ordering::Relaxed),
            durable: self.durable.load(Ordering::Relaxed),
        }
    }
}

/// Lock-free stats collector
///
/// Every counter is also mirrored to the `metrics` facade.
#[derive(Default)]
pub struct StatsCollector {
    hits: AtomicTierCounts,
    misses: AtomicTierCounts,
    promotions: AtomicU64,
    expired: AtomicU64,
    failures: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, tier: TierKind) {
        self.hits.increment(tier);
        metrics::counter!("strata_cache_hits_total", "tier" => tier.as_str()).increment(1);
    }

    pub fn record_miss(&self, tier: TierKind) {
        self.misses.increment(tier);
        metrics::counter!("strata_cache_misses_total", "tier" => tier.as_str()).increment(1);
    }

    pub fn record_promotion(&self, tier: TierKind) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("strata_cache_promotions_total", "tier" => tier.as_str()).increment(1);
    }

    pub fn record_expired(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.expired.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("strata_cache_expired_total").increment(count);
    }

    pub fn record_failure(&self, failure: &StorageFailure) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "strata_cache_failures_total",
            "tier" => failure.tier.as_str(),
            "reason" => failure.reason.as_str()
        )
        .increment(1);
    }

    /// Build a snapshot, reading size and count from the memory tier
    pub fn snapshot(&self, memory: &MemoryTier, durable_enabled: bool) -> CacheStats {
        CacheStats {
            hits: self.hits.load(),
            misses: self.misses.load(),
            size: memory.size(),
            count: memory.len() as u64,
            max_size: memory.max_size(),
            evictions: memory.evictions(),
            promotions: self.promotions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            durable_enabled,
        }
    }
}
