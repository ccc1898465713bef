//! Error types for punishment storage
//!
//! These never leave the store's public trait: every trait method logs the
//! error and degrades to a no-op or an empty result.

use thiserror::Error;

/// Errors that can occur while talking to the punishment store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing connection is closed or was never opened
    #[error("Punishment store connection is not available")]
    Unavailable,

    /// The database rejected a statement
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database file or its directory could not be prepared
    #[error("Database file error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded into a record
    #[error("Invalid punishment row for {id}: {reason}")]
    InvalidRow { id: String, reason: String },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
