//! Session-scoped in-process store

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::backend::{KeyValueStore, check_quota, item_size};
use crate::error::StorageError;

#[derive(Default)]
struct SessionState {
    items: HashMap<String, String>,
    used: u64,
}

/// In-process key-value store that lives as long as the process
///
/// Behaves like a page/session-scoped browser store: synchronous, bounded,
/// and shared by everything in the same process.
pub struct SessionStore {
    state: RwLock<SessionState>,
    capacity: u64,
}

impl SessionStore {
    /// Create an empty store with the given capacity in bytes
    pub fn new(capacity: u64) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            capacity,
        }
    }
}

impl KeyValueStore for SessionStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.state.read().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.write();
        let old = state
            .items
            .get(key)
            .map(|v| item_size(key, v))
            .unwrap_or(0);
        let new = item_size(key, value);
        check_quota(state.used, old, new, self.capacity)?;

        state.items.insert(key.to_string(), value.to_string());
        state.used = state.used - old + new;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write();
        match state.items.remove(key) {
            Some(value) => {
                state.used -= item_size(key, &value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.state.read().items.keys().cloned().collect())
    }

    fn used_bytes(&self) -> u64 {
        self.state.read().used
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}
