//! Platform-agnostic types for gridwatch historical sample data.
//!
//! This crate provides the shared data model used by the local store, the
//! hybrid cache, and consumers such as the CLI: samples, query ranges,
//! retention constants, and source tagging for resolved queries.
//!
//! # Example
//!
//! ```
//! use gridwatch_types::{QueryRange, RetentionPolicy, SourceTag};
//!
//! let policy = RetentionPolicy::default();
//! let range = QueryRange::new("feeder-1", "rec-9", 1_700_000_000_000, 1_700_000_060_000)?;
//! assert!(!policy.exceeds_retention(range.span_ms()));
//! assert_eq!(SourceTag::Local.to_string(), "local");
//! # Ok::<(), gridwatch_types::RangeError>(())
//! ```

pub mod error;
pub mod types;

pub use error::RangeError;
pub use types::{QueryRange, RangePreset, RetentionPolicy, Sample, SourceTag};
