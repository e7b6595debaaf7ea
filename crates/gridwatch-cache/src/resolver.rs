//! Hybrid query resolution.
//!
//! The resolver answers "all samples for series S between A and B" by
//! picking a strategy per query — local-only, remote-only, or a hybrid
//! split — then merging, deduplicating, and opportunistically backfilling
//! the local store with whatever came from the remote.
//!
//! Strategy selection, in order:
//!
//! 1. Span larger than the retention window: the local store can never hold
//!    it, go remote-only (even under `force_local_only`).
//! 2. `force_local_only` with the whole range inside the retained window:
//!    serve local as-is, however sparse — the caller (typically right after
//!    a preload) has asserted the cache is complete.
//! 3. Range entirely older than retention: previously cached out-of-window
//!    data is still valid, so local-first with a remote fallback.
//! 4. Range entirely inside retention: local-first; below the coverage
//!    threshold, refetch the full range remotely and merge.
//! 5. Range straddling the retention boundary: serve local if it reaches
//!    (nearly) back to `from`, otherwise split at the boundary — remote for
//!    the old part, local (or remote fallback) for the recent part.

use std::sync::Arc;

use tracing::{debug, warn};

use gridwatch_store::Store;
use gridwatch_types::{QueryRange, RangeError, RetentionPolicy, Sample, SourceTag};

use crate::backfill::backfill_batch;
use crate::coverage::coverage_ratio;
use crate::error::{Error, Result};
use crate::now_ms;
use crate::remote::RemoteClient;

/// If the earliest local sample lands within this slack of a straddling
/// range's start, local data is treated as complete for the whole range.
const LOCAL_COMPLETE_SLACK_MS: i64 = 5 * 60 * 1000;

/// Outcome of a resolved query.
///
/// Failures are part of the result rather than an `Err`: `source` is
/// [`SourceTag::Error`], `samples` is empty, and `error` holds the cause.
/// That keeps "query failed, offer a retry" distinguishable from "no data
/// in range" at the UI boundary.
#[derive(Debug)]
pub struct Resolved {
    /// Merged samples, ascending by timestamp, no duplicate timestamps.
    pub samples: Vec<Sample>,
    /// Where the samples came from.
    pub source: SourceTag,
    /// Present exactly when `source == SourceTag::Error`.
    pub error: Option<Error>,
}

impl Resolved {
    fn local(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            source: SourceTag::Local,
            error: None,
        }
    }

    fn remote(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            source: SourceTag::Remote,
            error: None,
        }
    }

    fn mixed(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            source: SourceTag::Mixed,
            error: None,
        }
    }

    fn failed(error: Error) -> Self {
        Self {
            samples: Vec::new(),
            source: SourceTag::Error,
            error: Some(error),
        }
    }

    /// Whether the query failed.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.source == SourceTag::Error
    }
}

/// The hybrid query resolver.
pub struct Resolver {
    store: Store,
    remote: Arc<dyn RemoteClient>,
    policy: RetentionPolicy,
}

impl Resolver {
    /// Create a resolver over a shared store handle and remote client.
    pub fn new(store: Store, remote: Arc<dyn RemoteClient>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            remote,
            policy,
        }
    }

    /// Resolve a range query. See the module docs for strategy selection.
    pub async fn resolve(&self, range: &QueryRange, force_local_only: bool) -> Resolved {
        if range.from >= range.to {
            return Resolved::failed(
                RangeError::Empty {
                    from: range.from,
                    to: range.to,
                }
                .into(),
            );
        }

        let span = range.span_ms();
        if self.policy.exceeds_retention(span) {
            debug!(
                "Range of {span} ms exceeds retention window, going remote-only for {}/{}",
                range.device_id, range.series_id
            );
            return match self.fetch_and_backfill(range, range.from, range.to).await {
                Ok(samples) => Resolved::remote(samples),
                Err(error) => Resolved::failed(error),
            };
        }

        let boundary = self.policy.local_boundary(now_ms());

        if force_local_only && range.from >= boundary {
            // Caller asserts the cache already holds the range (e.g. right
            // after a preload); no remote call however sparse the result.
            let samples = self.read_local(range, range.from, range.to);
            debug!(
                "Local-only query for {}/{}: {} samples",
                range.device_id,
                range.series_id,
                samples.len()
            );
            return Resolved::local(samples);
        }

        if range.to < boundary {
            // Entire range predates retention. Out-of-window data that was
            // cached earlier is still valid if present; only an empty local
            // side needs the remote at all.
            let local = self.read_local(range, range.from, range.to);
            if !local.is_empty() {
                return Resolved::local(local);
            }
            return match self.fetch_and_backfill(range, range.from, range.to).await {
                Ok(samples) => Resolved::remote(samples),
                Err(error) => Resolved::failed(error),
            };
        }

        if range.from >= boundary {
            return self.resolve_within_retention(range).await;
        }

        self.resolve_straddling(range, boundary).await
    }

    /// Range fully inside the retained window: the normal case.
    async fn resolve_within_retention(&self, range: &QueryRange) -> Resolved {
        let local = self.read_local(range, range.from, range.to);

        if local.is_empty() {
            return match self.fetch_and_backfill(range, range.from, range.to).await {
                Ok(samples) => Resolved::remote(samples),
                Err(error) => Resolved::failed(error),
            };
        }

        let coverage = coverage_ratio(&local, range.from, range.to);
        if coverage >= self.policy.query_backfill_coverage_ratio {
            debug!(
                "Serving {}/{} locally at {:.1}% coverage",
                range.device_id,
                range.series_id,
                coverage * 100.0
            );
            return Resolved::local(local);
        }

        debug!(
            "Coverage {:.1}% below threshold for {}/{}, completing from remote",
            coverage * 100.0,
            range.device_id,
            range.series_id
        );
        match self.fetch_and_backfill(range, range.from, range.to).await {
            Ok(remote) => Resolved::mixed(merge_dedup(remote, local)),
            Err(error) => Resolved::failed(error),
        }
    }

    /// Range straddling the retention boundary: remote for the old part,
    /// local (with remote fallback) for the recent part.
    async fn resolve_straddling(&self, range: &QueryRange, boundary: i64) -> Resolved {
        let full_local = self.read_local(range, range.from, range.to);
        if let Some(first) = full_local.first() {
            if first.timestamp <= range.from + LOCAL_COMPLETE_SLACK_MS {
                debug!(
                    "Straddling range for {}/{} already complete locally",
                    range.device_id, range.series_id
                );
                return Resolved::local(full_local);
            }
        }

        let older = match self.fetch_and_backfill(range, range.from, boundary).await {
            Ok(samples) => samples,
            Err(error) => return Resolved::failed(error),
        };

        let mut recent = self.read_local(range, boundary, range.to);
        if recent.is_empty() {
            recent = match self.fetch_and_backfill(range, boundary, range.to).await {
                Ok(samples) => samples,
                Err(error) => return Resolved::failed(error),
            };
        }

        Resolved::mixed(merge_dedup(older, recent))
    }

    /// Read the local side, downgrading a store failure to "no local data".
    fn read_local(&self, range: &QueryRange, from: i64, to: i64) -> Vec<Sample> {
        match self
            .store
            .query_range(&range.device_id, &range.series_id, from, to)
        {
            Ok(samples) => samples,
            Err(e) => {
                warn!(
                    "Local read failed for {}/{}, treating as empty: {e}",
                    range.device_id, range.series_id
                );
                Vec::new()
            }
        }
    }

    /// Fetch a sub-range from the remote and backfill the store with it.
    ///
    /// A backfill failure does not fail the query — the fetched data is
    /// still returned.
    async fn fetch_and_backfill(
        &self,
        range: &QueryRange,
        from: i64,
        to: i64,
    ) -> Result<Vec<Sample>> {
        let points = self.remote.fetch_range(&range.series_id, from, to).await?;

        let mut samples: Vec<Sample> = points
            .into_iter()
            .map(|p| p.into_sample(&range.device_id, &range.series_id))
            .collect();
        samples.sort_by_key(|s| s.timestamp);

        if let Err(e) = backfill_batch(&self.store, &samples) {
            warn!(
                "Backfill failed for {}/{}: {e}",
                range.device_id, range.series_id
            );
        }

        Ok(samples)
    }
}

/// Merge remote- and local-origin samples keyed by timestamp. Local entries
/// win collisions: live ingestion may have refreshed them since the remote
/// batch was recorded. Output is ascending with no duplicate timestamps.
fn merge_dedup(remote: Vec<Sample>, local: Vec<Sample>) -> Vec<Sample> {
    let mut merged = std::collections::BTreeMap::new();
    for sample in remote {
        merged.insert(sample.timestamp, sample);
    }
    for sample in local {
        merged.insert(sample.timestamp, sample);
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64, value: f64) -> Sample {
        Sample {
            device_id: "dev".into(),
            series_id: "ser".into(),
            timestamp,
            values: vec![value],
            base_index: 0,
            success: true,
        }
    }

    #[test]
    fn merge_sorts_and_dedups() {
        let remote = vec![sample(3_000, 3.0), sample(1_000, 1.0)];
        let local = vec![sample(2_000, 2.0)];

        let merged = merge_dedup(remote, local);
        let timestamps: Vec<i64> = merged.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![1_000, 2_000, 3_000]);
    }

    #[test]
    fn merge_prefers_local_on_collision() {
        let remote = vec![sample(1_000, 1.0), sample(2_000, 2.0)];
        let local = vec![sample(2_000, 99.0)];

        let merged = merge_dedup(remote, local);
        assert_eq!(merged.len(), 2);
        let at_2000 = merged.iter().find(|s| s.timestamp == 2_000).unwrap();
        assert_eq!(at_2000.values, vec![99.0]);
    }

    #[test]
    fn resolved_error_is_distinguishable_from_empty() {
        let failed = Resolved::failed(Error::RemoteUnavailable {
            message: "down".into(),
        });
        assert!(failed.is_err());
        assert!(failed.samples.is_empty());
        assert!(failed.error.is_some());

        let empty_local = Resolved::local(Vec::new());
        assert!(!empty_local.is_err());
        assert!(empty_local.error.is_none());
    }
}
