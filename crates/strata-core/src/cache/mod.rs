//! Tiered cache module

mod durable;
mod entry;
mod manager;
mod memory;
mod persistent;
mod scheduler;
mod stats;
mod tier;

pub use durable::DurableTier;
pub use entry::{CacheEntry, Clock, ENTRY_VERSION, StoredEntry, estimate_size};
pub use manager::CacheManager;
pub use memory::MemoryTier;
pub use persistent::PersistentTier;
pub use scheduler::CleanupScheduler;
pub use stats::{CacheStats, StatsCollector, TierCounts};
pub use tier::{STORAGE_KEY_PREFIX, TierAdapter, TierKind, storage_key};
