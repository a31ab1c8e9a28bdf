//! Error types for the chronicle core library.

use thiserror::Error;

/// Top-level error type for all chronicle operations.
#[derive(Error, Debug)]
pub enum ChronicleError {
    /// Malformed ingestion input, rejected synchronously.
    #[error("Invalid record: {reason}")]
    InvalidRecord {
        /// What validation failed.
        reason: String,
    },

    /// A saved state blob could not be decoded. The load is abandoned and
    /// any previously loaded state is left untouched.
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// Serialization failure while encoding a snapshot.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ChronicleError>;
