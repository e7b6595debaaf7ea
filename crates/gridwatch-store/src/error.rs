//! Error types for gridwatch-store.

use std::path::PathBuf;

/// Result type for gridwatch-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gridwatch-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to encode or decode the stored values vector.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
