//! Error types for gridwatch-cache.
//!
//! # Propagation rules
//!
//! - The resolver never lets an error escape as `Err`: failures are surfaced
//!   inside the result (`SourceTag::Error` plus the error itself), so the UI
//!   layer can tell "the query failed, offer a retry" apart from "no data in
//!   range".
//! - The preloader treats a single series' fetch failure as non-fatal; only
//!   cancellation aborts a run.
//! - The ingest path swallows store errors entirely (see
//!   [`crate::ingest::IngestWriter`]).

use std::path::PathBuf;

use thiserror::Error;

/// Result type for gridwatch-cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the hybrid cache.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level failure reaching the remote history service.
    /// Transient: retrying later may succeed.
    #[error("remote history service unavailable: {message}")]
    RemoteUnavailable { message: String },

    /// The remote rejected the request (invalid range or unknown series).
    /// Not retryable as-is.
    #[error("remote history service rejected the request: {message}")]
    RemoteRejected { message: String },

    /// The local store failed or is not ready. Read paths downgrade this to
    /// an empty local side instead of failing the whole query.
    #[error("local store unavailable: {0}")]
    LocalStoreUnavailable(#[from] gridwatch_store::Error),

    /// The requested range is malformed.
    #[error(transparent)]
    InvalidRange(#[from] gridwatch_types::RangeError),

    /// A preload run was cancelled before finishing.
    #[error("preload cancelled")]
    Cancelled,

    /// Failed to read the configuration file.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The remote base URL is not usable.
    #[error("invalid remote URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Whether retrying the same operation later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let unavailable = Error::RemoteUnavailable {
            message: "connection refused".into(),
        };
        let rejected = Error::RemoteRejected {
            message: "unknown series".into(),
        };

        assert!(unavailable.is_transient());
        assert!(!rejected.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }
}
