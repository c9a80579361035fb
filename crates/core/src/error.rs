//! Error types for soupstore
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! # Categories
//!
//! | Category | Variants | Description |
//! |----------|----------|-------------|
//! | Schema | `SoupNotFound`, `EmptyIndexSpecs`, `InvalidSoupName`, `PathNotIndexed` | Soup is missing or misdeclared |
//! | Lookup | `EntryNotFound` | Update matched zero rows |
//! | Upsert | `AmbiguousExternalId` | More than one document owns an external id |
//! | Input | `InvalidInput`, `InvalidQuery`, `MalformedJson`, `InvalidCursor` | Rejected before touching the store |
//! | Backing store | `Store`, `Io`, `Config`, `StoreClosed` | Wrapped engine failures |
//! | Transaction | `TransactionAborted` | A nested scope failed, so the outer one rolled back |
//! | System | `Serialization` | Raw document could not be encoded or decoded |

use std::io;
use thiserror::Error;

/// Result type alias for soupstore operations
pub type SoupResult<T> = std::result::Result<T, SoupError>;

/// Error types for soupstore
#[derive(Debug, Error)]
pub enum SoupError {
    // ==================== Schema ====================
    /// Soup has not been registered
    #[error("soup does not exist: {soup}")]
    SoupNotFound {
        /// Soup name
        soup: String,
    },

    /// Registration or alter with no index specs
    #[error("soup {soup} must declare at least one index spec")]
    EmptyIndexSpecs {
        /// Soup name
        soup: String,
    },

    /// Empty or otherwise unusable soup name
    #[error("invalid soup name: {reason}")]
    InvalidSoupName {
        /// Why the name was rejected
        reason: String,
    },

    /// Query or upsert references a path with no backing column
    #[error("path {path} is not indexed in soup {soup}")]
    PathNotIndexed {
        /// Soup name
        soup: String,
        /// Dot-delimited path
        path: String,
    },

    // ==================== Lookup ====================
    /// Update addressed an entry id that does not exist
    #[error("entry {entry_id} not found in soup {soup}")]
    EntryNotFound {
        /// Soup name
        soup: String,
        /// Soup entry id
        entry_id: i64,
    },

    // ==================== Upsert ====================
    /// More than one document matched an external id value
    #[error("{matches} entries in soup {soup} match external id path {path}")]
    AmbiguousExternalId {
        /// Soup name
        soup: String,
        /// External id path
        path: String,
        /// Number of matching rows
        matches: usize,
    },

    // ==================== Input ====================
    /// Invalid input
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected
        reason: String,
    },

    /// QuerySpec with an illegal parameter combination
    #[error("invalid query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected
        reason: String,
    },

    /// Unparsable JSON at the API boundary
    #[error("malformed json: {reason}")]
    MalformedJson {
        /// Parser message
        reason: String,
    },

    /// Cursor id is unknown or already closed
    #[error("invalid cursor: {cursor_id}")]
    InvalidCursor {
        /// Cursor id
        cursor_id: u64,
    },

    // ==================== Backing store ====================
    /// Backing engine error (I/O, corruption, lock contention)
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// I/O error outside the backing engine (data directory, config file)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid store configuration
    #[error("config error: {reason}")]
    Config {
        /// Why the config was rejected
        reason: String,
    },

    /// Operation on a store handle after `close()`
    #[error("store is closed")]
    StoreClosed,

    // ==================== Transaction ====================
    /// Outer transaction rolled back because a nested scope inside it failed
    #[error("transaction rolled back: {failed} nested scope(s) failed")]
    TransactionAborted {
        /// Number of nested scopes that rolled back
        failed: usize,
    },

    // ==================== System ====================
    /// Raw document serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SoupError {
    /// Soup not registered
    pub fn soup_not_found(soup: impl Into<String>) -> Self {
        SoupError::SoupNotFound { soup: soup.into() }
    }

    /// Invalid input
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        SoupError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Invalid query
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        SoupError::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Malformed JSON
    pub fn malformed_json(reason: impl Into<String>) -> Self {
        SoupError::MalformedJson {
            reason: reason.into(),
        }
    }

    /// Config error
    pub fn config(reason: impl Into<String>) -> Self {
        SoupError::Config {
            reason: reason.into(),
        }
    }

    /// Path not indexed
    pub fn path_not_indexed(soup: impl Into<String>, path: impl Into<String>) -> Self {
        SoupError::PathNotIndexed {
            soup: soup.into(),
            path: path.into(),
        }
    }

    /// True for errors caused by a missing or misdeclared soup schema
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            SoupError::SoupNotFound { .. }
                | SoupError::EmptyIndexSpecs { .. }
                | SoupError::InvalidSoupName { .. }
                | SoupError::PathNotIndexed { .. }
        )
    }

    /// True for errors raised by the backing engine itself
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            SoupError::Store(_) | SoupError::Io(_) | SoupError::StoreClosed
        )
    }

    /// Stable machine-readable code for the error variant
    pub fn error_code(&self) -> &'static str {
        match self {
            SoupError::SoupNotFound { .. } => "SoupNotFound",
            SoupError::EmptyIndexSpecs { .. } => "EmptyIndexSpecs",
            SoupError::InvalidSoupName { .. } => "InvalidSoupName",
            SoupError::PathNotIndexed { .. } => "PathNotIndexed",
            SoupError::EntryNotFound { .. } => "EntryNotFound",
            SoupError::AmbiguousExternalId { .. } => "AmbiguousExternalId",
            SoupError::InvalidInput { .. } => "InvalidInput",
            SoupError::InvalidQuery { .. } => "InvalidQuery",
            SoupError::MalformedJson { .. } => "MalformedJson",
            SoupError::InvalidCursor { .. } => "InvalidCursor",
            SoupError::Store(_) => "Store",
            SoupError::Io(_) => "Io",
            SoupError::Config { .. } => "Config",
            SoupError::StoreClosed => "StoreClosed",
            SoupError::TransactionAborted { .. } => "TransactionAborted",
            SoupError::Serialization(_) => "Serialization",
        }
    }
}
