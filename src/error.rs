//! Error types for worldstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::world::Dbref;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for worldstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Snapshot (flatfile) Errors
    // -------------------------------------------------------------------------
    /// The stream is not a valid snapshot. Loads are all-or-nothing: no
    /// partially read database is ever handed back.
    #[error("Corrupt snapshot at line {line}: {reason}")]
    CorruptSnapshot { line: usize, reason: String },

    #[error("Unsupported dialect for writing: {0}")]
    UnsupportedDialect(String),

    #[error("Lock syntax error: {0}")]
    LockSyntax(String),

    // -------------------------------------------------------------------------
    // Hash Index Errors
    // -------------------------------------------------------------------------
    #[error("Duplicate key in hash index: {0}")]
    DuplicateKey(String),

    #[error("Key kind mismatch: table holds {expected} keys")]
    KeyKindMismatch { expected: &'static str },

    #[error("Hash index is not initialized")]
    Uninitialized,

    // -------------------------------------------------------------------------
    // Cache / Record Errors
    // -------------------------------------------------------------------------
    #[error("Unknown record type: {0}")]
    UnknownRecordType(u32),

    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // World Model Errors
    // -------------------------------------------------------------------------
    #[error("No such object: #{0}")]
    NoSuchObject(Dbref),

    #[error("Invalid attribute name: {0:?}")]
    InvalidAttrName(String),

    // -------------------------------------------------------------------------
    // Backing Store Errors
    // -------------------------------------------------------------------------
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend log corruption detected: {0}")]
    BackendCorruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    /// Shorthand for building a snapshot corruption error
    pub(crate) fn corrupt(line: usize, reason: impl Into<String>) -> Self {
        StoreError::CorruptSnapshot {
            line,
            reason: reason.into(),
        }
    }
}
