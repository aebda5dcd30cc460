//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Quota exceeded: {required} bytes needed, {available} of {capacity} available")]
    QuotaExceeded {
        required: u64,
        available: u64,
        capacity: u64,
    },

    #[error("Corrupt item: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether this error is a capacity rejection rather than a fault
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}
