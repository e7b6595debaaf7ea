//! Error types for gridwatch-types.

use thiserror::Error;

/// Errors produced when constructing query ranges.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RangeError {
    /// `from` must be strictly before `to`.
    #[error("invalid range: from ({from}) must be before to ({to})")]
    Empty { from: i64, to: i64 },
}
