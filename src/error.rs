//! Error types for btreekv
//!
//! Provides a unified error type for all store operations.

use thiserror::Error;

use crate::storage::PageId;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // State Errors
    // -------------------------------------------------------------------------
    #[error("Store is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted page {page}: {reason}")]
    Corruption { page: PageId, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key absent on `get`/`delete`
    NotFound,
    /// Out-of-range open parameter or malformed flags
    InvalidArgument,
    /// Operation on a closed store
    InvalidState,
    /// Stream failure or malformed backing storage
    Io,
}

impl StoreError {
    /// Shorthand for a corruption error on `page`
    pub(crate) fn corruption(page: PageId, reason: impl Into<String>) -> Self {
        StoreError::Corruption {
            page,
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::KeyNotFound => ErrorKind::NotFound,
            StoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StoreError::Closed => ErrorKind::InvalidState,
            StoreError::Io(_) | StoreError::Corruption { .. } | StoreError::Serialization(_) => {
                ErrorKind::Io
            }
        }
    }

    /// True for `KeyNotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
