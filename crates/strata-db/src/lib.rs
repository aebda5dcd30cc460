//! Strata Durable Tier Database Layer
//!
//! This crate provides the durable cache store for Strata,
//! using SQLite via sqlx with secondary indexes on tag and expiry.

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use repository::{Database, DurableStats};

/// Re-export sqlx types for convenience
pub use sqlx::Error as SqlxError;
