//! Core error types

use strata_db::DbError;
use strata_storage::StorageError;
use thiserror::Error;

use crate::cache::TierKind;

/// Errors that can stop a cache manager from being constructed
///
/// Once constructed, the manager never surfaces errors; operation-time
/// problems are reported as [`StorageFailure`] and absorbed.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Why a tier operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The tier rejected a write for lack of capacity
    QuotaExceeded,
    /// The tier is not available in this environment
    Unsupported,
    /// A stored entry could not be decoded
    Corrupt,
    /// A value could not be encoded for the tier
    Serialization,
    /// Any other backend fault (I/O, SQL)
    Backend,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::QuotaExceeded => "quota_exceeded",
            FailureReason::Unsupported => "unsupported",
            FailureReason::Corrupt => "corrupt",
            FailureReason::Serialization => "serialization",
            FailureReason::Backend => "backend",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform failure result returned by every tier adapter
#[derive(Error, Debug, Clone)]
#[error("{tier} tier {reason}: {detail}")]
pub struct StorageFailure {
    pub tier: TierKind,
    pub reason: FailureReason,
    pub detail: String,
}

impl StorageFailure {
    pub fn new(tier: TierKind, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            tier,
            reason,
            detail: detail.into(),
        }
    }

    /// Map a key-value store error onto a failure reason
    pub fn from_storage(tier: TierKind, err: StorageError) -> Self {
        let reason = match &err {
            StorageError::QuotaExceeded { .. } => FailureReason::QuotaExceeded,
            StorageError::Corrupt(_) => FailureReason::Corrupt,
            StorageError::Serialization(_) => FailureReason::Serialization,
            StorageError::Io(_) => FailureReason::Backend,
        };
        Self::new(tier, reason, err.to_string())
    }

    /// Map a database error onto a failure reason
    pub fn from_db(tier: TierKind, err: DbError) -> Self {
        let reason = match &err {
            DbError::Corrupt(_) => FailureReason::Corrupt,
            DbError::Connection(sqlx_err) if is_unavailable(sqlx_err) => FailureReason::Unsupported,
            DbError::Connection(_) => FailureReason::Backend,
        };
        Self::new(tier, reason, err.to_string())
    }
}

/// Errors meaning the database can no longer be used at all
fn is_unavailable(err: &strata_db::SqlxError) -> bool {
    matches!(
        err,
        strata_db::SqlxError::PoolClosed | strata_db::SqlxError::Configuration(_)
    )
}
