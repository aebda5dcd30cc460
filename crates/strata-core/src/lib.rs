//! Strata Cache Core
//!
//! This crate provides the tiered cache engine: the entry model, the
//! memory, persistent and durable tier adapters, the cache manager with
//! promotion and tag invalidation, and the background cleanup scheduler.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CacheEntry, CacheManager, CacheStats, TierAdapter, TierKind};
pub use config::CacheConfig;
pub use error::{CoreError, FailureReason, StorageFailure};
