//! Key-value store trait

use crate::error::StorageError;

/// Synchronous string key-value store with a hard capacity ceiling
///
/// Usage is measured as `key.len() + value.len()` bytes per item. A write
/// that would push usage past `capacity()` fails with
/// [`StorageError::QuotaExceeded`] and leaves the previous value in place.
pub trait KeyValueStore: Send + Sync {
    /// Read an item
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write an item, replacing any previous value
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove an item, returning whether it existed
    fn remove_item(&self, key: &str) -> Result<bool, StorageError>;

    /// List all keys currently stored
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Bytes currently in use
    fn used_bytes(&self) -> u64;

    /// Hard capacity in bytes
    fn capacity(&self) -> u64;
}

/// Accounted size of a single item
pub fn item_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// Check that replacing an item of `old` bytes by one of `new` bytes fits
pub(crate) fn check_quota(
    used: u64,
    old: u64,
    new: u64,
    capacity: u64,
) -> Result<(), StorageError> {
    let after = used.saturating_sub(old) + new;
    if after > capacity {
        return Err(StorageError::QuotaExceeded {
            required: new,
            available: capacity.saturating_sub(used.saturating_sub(old)),
            capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_size() {
        assert_eq!(item_size("", ""), 0);
        assert_eq!(item_size("abc", "de"), 5);
    }

    #[test]
    fn test_check_quota() {
        assert!(check_quota(0, 0, 10, 10).is_ok());
        assert!(check_quota(5, 0, 6, 10).unwrap_err().is_quota_exceeded());
        // Replacing an existing item only counts the delta
        assert!(check_quota(10, 4, 4, 10).is_ok());

        match check_quota(8, 0, 4, 10) {
            Err(StorageError::QuotaExceeded {
                required,
                available,
                capacity,
            }) => {
                assert_eq!(required, 4);
                assert_eq!(available, 2);
                assert_eq!(capacity, 10);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
