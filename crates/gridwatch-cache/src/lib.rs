//! Hybrid local/remote historical sample cache for gridwatch.
//!
//! Answers "give me all samples for series S between A and B" by combining
//! a small, fast, bounded local store with the authoritative but
//! higher-latency remote history service, while minimizing redundant remote
//! calls:
//!
//! - [`Resolver`] picks local-only, remote-only, or a hybrid split per
//!   query, merges and deduplicates, and opportunistically backfills the
//!   local store with everything fetched remotely.
//! - [`Preloader`] warms the full retention window in the background before
//!   queries arrive, skipping series that are already covered and fresh.
//! - [`IngestWriter`] is the best-effort write path live polling uses.
//! - [`HistoryCache`] wires all of the above over one shared store handle.
//!
//! # Example
//!
//! ```no_run
//! use gridwatch_cache::{CacheConfig, HistoryCache};
//! use gridwatch_types::QueryRange;
//!
//! # async fn example() -> gridwatch_cache::Result<()> {
//! let cache = HistoryCache::open(&CacheConfig::default())?;
//!
//! let range = QueryRange::new("feeder-1", "rec-9", 1_700_000_000_000, 1_700_086_400_000)?;
//! let resolved = cache.resolve(&range, false).await;
//! println!("{} samples from {}", resolved.samples.len(), resolved.source);
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod cache;
pub mod config;
pub mod coverage;
pub mod error;
pub mod http;
pub mod ingest;
pub mod mock;
pub mod preload;
pub mod remote;
pub mod resolver;

pub use cache::HistoryCache;
pub use config::{CacheConfig, RemoteConfig, RetentionConfig, StoreConfig};
pub use coverage::coverage_ratio;
pub use error::{Error, Result};
pub use http::HttpRemoteClient;
pub use ingest::{IngestReading, IngestWriter};
pub use mock::MockRemote;
pub use preload::{PreloadOutcome, PreloadTask, Preloader, ProgressCallback};
pub use remote::{RemoteClient, RemotePoint};
pub use resolver::{Resolved, Resolver};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
