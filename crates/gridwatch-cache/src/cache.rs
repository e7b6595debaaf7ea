//! The [`HistoryCache`] facade: one shared store, all components wired.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use gridwatch_store::{Store, StoreStats};
use gridwatch_types::{QueryRange, RetentionPolicy};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::http::HttpRemoteClient;
use crate::ingest::{IngestReading, IngestWriter};
use crate::now_ms;
use crate::preload::Preloader;
use crate::remote::RemoteClient;
use crate::resolver::{Resolved, Resolver};

/// The hybrid historical-sample cache, one instance per client process.
///
/// Owns the shared local store handle and the three activities over it:
/// the resolver (reads), the preloader (bulk warm-up writes), and the
/// ingest writer (live poll writes). The store serializes access
/// internally, so none of the activities block each other at this layer.
pub struct HistoryCache {
    store: Store,
    resolver: Resolver,
    preloader: Preloader,
    writer: IngestWriter,
    policy: RetentionPolicy,
}

impl HistoryCache {
    /// Open the cache described by a configuration: open (or create) the
    /// local store, run the opportunistic age sweep, and wire the
    /// components over an HTTP remote client.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let store = match &config.store.path {
            Some(path) => Store::open(path)?,
            None => Store::open_default()?,
        };
        let remote = Arc::new(HttpRemoteClient::with_timeout(
            &config.remote.base_url,
            Duration::from_secs(config.remote.request_timeout_secs),
        )?);
        Ok(Self::attach(store, remote, config.retention_policy()))
    }

    /// Wire the components over an existing store and remote client.
    ///
    /// Runs the same opportunistic age sweep as [`open`](Self::open). This
    /// is the constructor tests use with an in-memory store and a mock
    /// remote.
    pub fn attach(store: Store, remote: Arc<dyn RemoteClient>, policy: RetentionPolicy) -> Self {
        match store.evict_older_than(now_ms() - policy.retention_window_ms) {
            Ok(0) => {}
            Ok(evicted) => info!("Startup sweep evicted {evicted} expired samples"),
            Err(e) => warn!("Startup sweep failed: {e}"),
        }

        Self {
            resolver: Resolver::new(store.clone(), Arc::clone(&remote), policy),
            preloader: Preloader::new(store.clone(), remote, policy),
            writer: IngestWriter::new(store.clone()),
            store,
            policy,
        }
    }

    /// The sole read entry point; see [`Resolver::resolve`].
    pub async fn resolve(&self, range: &QueryRange, force_local_only: bool) -> Resolved {
        self.resolver.resolve(range, force_local_only).await
    }

    /// Append a live-polled reading; see [`IngestWriter::ingest`].
    pub fn ingest(&self, device_id: &str, series_id: &str, reading: IngestReading) {
        self.writer.ingest(device_id, series_id, reading);
    }

    /// The warm-up handle (preload, cancel, reset, progress).
    pub fn preloader(&self) -> &Preloader {
        &self.preloader
    }

    /// Run the age sweep now. Returns the number of evicted samples.
    pub fn evict_expired(&self) -> Result<usize> {
        Ok(self
            .store
            .evict_older_than(now_ms() - self.policy.retention_window_ms)?)
    }

    /// Remove every cached sample. For testing and troubleshooting only —
    /// the cache rebuilds itself from the remote afterwards.
    pub fn clear_all(&self) -> Result<()> {
        Ok(self.store.clear_all()?)
    }

    /// Coarse store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }

    /// The shared store handle.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The retention policy this cache was initialized with.
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }
}
