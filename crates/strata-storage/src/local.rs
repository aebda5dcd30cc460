//! File-backed local store

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::backend::{KeyValueStore, check_quota, item_size};
use crate::error::StorageError;

/// On-disk item record
#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    key: String,
    value: String,
}

#[derive(Default)]
struct LocalIndex {
    sizes: HashMap<String, u64>,
    used: u64,
}

/// Local disk key-value store
///
/// Stores one file per item in a sharded directory structure:
/// `<base_path>/items/<first 2 chars>/<sha256(key)>`
///
/// The key → size index lives in memory and is rebuilt from disk on open,
/// so capacity checks never touch the filesystem.
pub struct LocalStore {
    items_path: PathBuf,
    index: Mutex<LocalIndex>,
    capacity: u64,
}

impl LocalStore {
    /// Open (or create) a local store rooted at `base_path`
    pub fn open(base_path: impl AsRef<Path>, capacity: u64) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let items_path = base_path.join("items");
        fs::create_dir_all(&items_path)?;

        let index = Self::rebuild_index(&items_path)?;
        info!(
            "Opened local store at {:?} ({} items, {} of {} bytes used)",
            base_path,
            index.sizes.len(),
            index.used,
            capacity
        );

        Ok(Self {
            items_path,
            index: Mutex::new(index),
            capacity,
        })
    }

    /// Scan every shard directory and rebuild the in-memory index
    fn rebuild_index(items_path: &Path) -> Result<LocalIndex, StorageError> {
        let mut index = LocalIndex::default();

        for shard in fs::read_dir(items_path)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                let path = file?.path();
                match Self::read_item(&path) {
                    Ok(item) => {
                        let size = item_size(&item.key, &item.value);
                        index.used += size;
                        index.sizes.insert(item.key, size);
                    }
                    Err(e) => warn!("Skipping unreadable item {:?}: {}", path, e),
                }
            }
        }

        Ok(index)
    }

    /// Get the file path for a key
    fn item_path(&self, key: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        // Use first 2 characters for sharding
        let shard = &hash[..2];
        self.items_path.join(shard).join(&hash)
    }

    fn read_item(path: &Path) -> Result<StoredItem, StorageError> {
        let content = fs::read(path)?;
        serde_json::from_slice(&content)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e)))
    }

    /// Write an item atomically using a temp file in the same directory
    fn write_item(&self, path: &Path, item: &StoredItem) -> Result<(), StorageError> {
        let parent = path.parent().unwrap_or(&self.items_path);
        fs::create_dir_all(parent)?;

        let content = serde_json::to_vec(item)?;
        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(&content)?;
        temp_file.flush()?;
        temp_file.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for LocalStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        // Held across the read so a concurrent write cannot be forgotten below
        let mut index = self.index.lock();
        if !index.sizes.contains_key(key) {
            return Ok(None);
        }

        let path = self.item_path(key);
        match Self::read_item(&path) {
            Ok(item) if item.key == key => Ok(Some(item.value)),
            Ok(item) => Err(StorageError::Corrupt(format!(
                "{} holds key {:?}, expected {:?}",
                path.display(),
                item.key,
                key
            ))),
            Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                // File removed behind our back, forget it
                if let Some(size) = index.sizes.remove(key) {
                    index.used -= size;
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut index = self.index.lock();
        let old = index.sizes.get(key).copied().unwrap_or(0);
        let new = item_size(key, value);
        check_quota(index.used, old, new, self.capacity)?;

        let path = self.item_path(key);
        debug!("Writing item to {:?}", path);
        self.write_item(
            &path,
            &StoredItem {
                key: key.to_string(),
                value: value.to_string(),
            },
        )?;

        index.sizes.insert(key.to_string(), new);
        index.used = index.used - old + new;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool, StorageError> {
        let mut index = self.index.lock();
        let Some(size) = index.sizes.remove(key) else {
            return Ok(false);
        };
        index.used -= size;

        let path = self.item_path(key);
        debug!("Deleting item at {:?}", path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.index.lock().sizes.keys().cloned().collect())
    }

    fn used_bytes(&self) -> u64 {
        self.index.lock().used
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}
