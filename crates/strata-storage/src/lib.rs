//! Strata Persistent Tier Storage
//!
//! This crate provides the synchronous, capacity-limited key-value stores
//! backing the persistent cache tier: a session-scoped in-process store and
//! a file-backed local store.

pub mod backend;
pub mod error;
pub mod local;
pub mod session;

pub use backend::KeyValueStore;
pub use error::StorageError;
pub use local::LocalStore;
pub use session::SessionStore;
