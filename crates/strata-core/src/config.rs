//! Cache configuration
//!
//! Recognized options only; unknown keys in a configuration source are
//! ignored rather than rejected.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Shortest allowed cleanup interval (1 second)
const MIN_CLEANUP_INTERVAL_SECS: u64 = 1;

/// Configuration for the cache manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory tier budget in bytes
    #[serde(default = "default_max_memory_size")]
    pub max_memory_size: u64,
    /// Persistent tier capacity in bytes
    #[serde(default = "default_max_persistent_size")]
    pub max_persistent_size: u64,
    /// TTL applied when `set` is not given one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Open the durable tier
    #[serde(default = "default_enable_durable_tier")]
    pub enable_durable_tier: bool,
    /// An item may use at most `1 / memory_item_fraction` of the memory budget
    #[serde(default = "default_memory_item_fraction")]
    pub memory_item_fraction: u64,
    /// An item may use at most `1 / persistent_item_fraction` of the
    /// persistent capacity
    #[serde(default = "default_persistent_item_fraction")]
    pub persistent_item_fraction: u64,
    /// Period of the background cleanup sweep
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Directory for a file-backed persistent tier; in-process when unset
    #[serde(default)]
    pub persistent_path: Option<String>,
    /// Database URL of the durable tier
    #[serde(default = "default_durable_url")]
    pub durable_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_size: default_max_memory_size(),
            max_persistent_size: default_max_persistent_size(),
            default_ttl_secs: default_ttl_secs(),
            enable_durable_tier: default_enable_durable_tier(),
            memory_item_fraction: default_memory_item_fraction(),
            persistent_item_fraction: default_persistent_item_fraction(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            persistent_path: None,
            durable_url: default_durable_url(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Largest item admitted to the memory tier
    pub fn memory_item_budget(&self) -> u64 {
        self.max_memory_size / self.memory_item_fraction.max(1)
    }

    /// Largest item admitted to the persistent tier
    pub fn persistent_item_budget(&self) -> u64 {
        self.max_persistent_size / self.persistent_item_fraction.max(1)
    }

    /// Clamp values that would make the cache unusable, logging each change
    pub fn validated(mut self) -> Self {
        if self.default_ttl_secs == 0 {
            warn!(
                "default_ttl_secs must be positive, using {}",
                default_ttl_secs()
            );
            self.default_ttl_secs = default_ttl_secs();
        }
        if self.memory_item_fraction == 0 {
            warn!("memory_item_fraction must be at least 1, using 1");
            self.memory_item_fraction = 1;
        }
        if self.persistent_item_fraction == 0 {
            warn!("persistent_item_fraction must be at least 1, using 1");
            self.persistent_item_fraction = 1;
        }
        if self.cleanup_interval_secs < MIN_CLEANUP_INTERVAL_SECS {
            warn!(
                "cleanup_interval_secs {} is below minimum {}, using minimum",
                self.cleanup_interval_secs, MIN_CLEANUP_INTERVAL_SECS
            );
            self.cleanup_interval_secs = MIN_CLEANUP_INTERVAL_SECS;
        }
        self
    }
}

// Default value functions
fn default_max_memory_size() -> u64 {
    50 * 1024 * 1024 // 50 MB
}

fn default_max_persistent_size() -> u64 {
    5 * 1024 * 1024 // 5 MB
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_enable_durable_tier() -> bool {
    true
}

fn default_memory_item_fraction() -> u64 {
    10
}

fn default_persistent_item_fraction() -> u64 {
    5
}

fn default_cleanup_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_durable_url() -> String {
    "sqlite:./data/strata-cache.db?mode=rwc".to_string()
}
