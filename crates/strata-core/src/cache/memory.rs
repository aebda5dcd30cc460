//! Memory tier: bounded in-process map with FIFO eviction

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::entry::StoredEntry;
use super::tier::{TierAdapter, TierKind};
use crate::error::{FailureReason, StorageFailure};

struct Slot {
    entry: StoredEntry,
    seq: u64,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Slot>,
    /// Eviction order: write timestamp, then insertion sequence
    order: BTreeMap<(i64, u64), String>,
    occupied: u64,
    next_seq: u64,
}

impl MemoryState {
    fn remove(&mut self, key: &str) -> Option<StoredEntry> {
        let slot = self.entries.remove(key)?;
        self.order
            .remove(&(slot.entry.timestamp.timestamp_millis(), slot.seq));
        self.occupied -= slot.entry.size;
        Some(slot.entry)
    }

    fn remove_where(&mut self, mut predicate: impl FnMut(&StoredEntry) -> bool) -> u64 {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| predicate(&slot.entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len() as u64
    }
}

/// Memory tier
///
/// All admission, eviction and deletion happens under one mutex, so the
/// occupied size never exceeds `max_size` as observed by any other
/// operation.
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    max_size: u64,
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Create an empty memory tier with a byte budget
    pub fn new(max_size: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_size,
            evictions: AtomicU64::new(0),
        }
    }

    /// Get an entry (expired or not)
    pub fn get(&self, key: &str) -> Option<StoredEntry> {
        self.state.lock().entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Admit an entry, evicting the oldest writes until it fits
    ///
    /// An entry larger than the whole budget is rejected without evicting
    /// anything. Returns the keys evicted to make room.
    pub fn insert(&self, key: &str, entry: StoredEntry) -> Result<Vec<String>, StorageFailure> {
        if entry.size > self.max_size {
            return Err(StorageFailure::new(
                TierKind::Memory,
                FailureReason::QuotaExceeded,
                format!("{} bytes exceeds budget of {}", entry.size, self.max_size),
            ));
        }

        let mut state = self.state.lock();
        state.remove(key);

        let mut evicted = Vec::new();
        while state.occupied + entry.size > self.max_size {
            let Some((_, oldest)) = state.order.pop_first() else {
                break;
            };
            if let Some(slot) = state.entries.remove(&oldest) {
                state.occupied -= slot.entry.size;
                evicted.push(oldest);
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .order
            .insert((entry.timestamp.timestamp_millis(), seq), key.to_string());
        state.occupied += entry.size;
        state.entries.insert(key.to_string(), Slot { entry, seq });

        if !evicted.is_empty() {
            self.evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            debug!("Evicted {} memory entries to admit {}", evicted.len(), key);
        }
        Ok(evicted)
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<StoredEntry> {
        self.state.lock().remove(key)
    }

    /// Bytes currently occupied
    pub fn size(&self) -> u64 {
        self.state.lock().occupied
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte budget
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Total entries evicted since creation
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TierAdapter for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn try_get(&self, key: &str) -> Result<Option<StoredEntry>, StorageFailure> {
        Ok(self.get(key))
    }

    async fn try_put(&self, key: &str, entry: &StoredEntry) -> Result<(), StorageFailure> {
        self.insert(key, entry.clone()).map(|_| ())
    }

    async fn try_delete(&self, key: &str) -> Result<(), StorageFailure> {
        self.remove(key);
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<(String, StoredEntry)>, StorageFailure> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .map(|(key, slot)| (key.clone(), slot.entry.clone()))
            .collect())
    }

    async fn delete_by_tags(&self, tags: &BTreeSet<String>) -> Result<u64, StorageFailure> {
        Ok(self.state.lock().remove_where(|entry| entry.has_any_tag(tags)))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageFailure> {
        Ok(self.state.lock().remove_where(|entry| entry.is_expired(now)))
    }

    async fn clear(&self) -> Result<(), StorageFailure> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        state.occupied = 0;
        Ok(())
    }
}
