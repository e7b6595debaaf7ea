//! Local persistence for gridwatch historical samples.
//!
//! This crate provides the SQLite-backed sample cache: a bounded, disposable
//! local store keyed by `(device_id, series_id, timestamp)` that the hybrid
//! resolver, the preloader, and the live ingest path all share. The store is
//! rebuildable from the remote history service at any time; losing it only
//! costs refetches.
//!
//! # Features
//!
//! - Upsert-by-key writes (last write wins on a duplicate timestamp)
//! - Ordered range scans over a composite `(device, series, timestamp)` key
//! - Index-backed timestamp lookups for dedup-aware backfill
//! - Age-based eviction and a full clear for troubleshooting
//! - Internal synchronization: handles are `Clone` and safe to share
//!
//! # Example
//!
//! ```no_run
//! use gridwatch_store::Store;
//!
//! let store = Store::open_default()?;
//! let samples = store.query_range("feeder-1", "rec-9", 1_700_000_000_000, 1_700_086_400_000)?;
//! println!("{} samples cached", samples.len());
//! # Ok::<(), gridwatch_store::Error>(())
//! ```

mod error;
mod schema;
mod store;

pub use error::{Error, Result};
pub use store::{Store, StoreStats};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/gridwatch/cache.db`
/// - macOS: `~/Library/Application Support/gridwatch/cache.db`
/// - Windows: `C:\Users\<user>\AppData\Local\gridwatch\cache.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("gridwatch")
        .join("cache.db")
}
