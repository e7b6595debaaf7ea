//! Background warm-up of the local store.
//!
//! Before a device's history window opens, the preloader makes sure the full
//! retention window is cached locally so the first query never waits on the
//! remote. Series whose cache is already warm — enough coverage *and* a
//! fresh enough newest sample, two independent checks — are skipped.
//!
//! Each preloader is an owned handle with its own cancellation token and
//! progress channel, so concurrent preloads for different devices never
//! interfere. Cancellation is checked between work units, never inside one
//! fetch; every unit's backfill is a single atomic batch, so a cancelled
//! preload leaves a consistent, partially warmed store that a later run
//! picks up where coverage is still cold.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gridwatch_store::Store;
use gridwatch_types::RetentionPolicy;

use crate::backfill::backfill_batch;
use crate::coverage::coverage_ratio;
use crate::error::{Error, Result};
use crate::now_ms;
use crate::remote::{RemoteClient, RemotePoint};

/// Progress callback, invoked with a monotonically non-decreasing
/// percentage in `0..=100`.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Result of a preload run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadOutcome {
    /// False only when the run was cancelled before finishing.
    pub success: bool,
    /// Whether any remote data was fetched (false when everything was
    /// already warm).
    pub fetched_anything: bool,
    /// Series whose fetch or backfill failed; the rest of the run
    /// continued without them.
    pub failed_series: Vec<String>,
}

/// One unit of station-wide preload work: a series on a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreloadTask {
    pub device_id: String,
    pub series_id: String,
}

/// Warm-up handle over a shared store and remote client.
pub struct Preloader {
    store: Store,
    remote: Arc<dyn RemoteClient>,
    policy: RetentionPolicy,
    cancel: Mutex<CancellationToken>,
    progress_tx: watch::Sender<u8>,
}

impl Preloader {
    /// Create a preloader. Each handle owns its cancellation state.
    pub fn new(store: Store, remote: Arc<dyn RemoteClient>, policy: RetentionPolicy) -> Self {
        let (progress_tx, _) = watch::channel(0);
        Self {
            store,
            remote,
            policy,
            cancel: Mutex::new(CancellationToken::new()),
            progress_tx,
        }
    }

    /// Warm the retention window for a set of series on one device.
    ///
    /// Series appearing more than once (e.g. two display roles backed by the
    /// same feed) collapse into a single fetch.
    pub async fn preload(
        &self,
        device_id: &str,
        series: &[String],
        on_progress: Option<ProgressCallback>,
    ) -> PreloadOutcome {
        let tasks: Vec<PreloadTask> = series
            .iter()
            .map(|series_id| PreloadTask {
                device_id: device_id.to_string(),
                series_id: series_id.clone(),
            })
            .collect();
        self.preload_station(&tasks, on_progress).await
    }

    /// Warm the retention window for `(device, series)` pairs across many
    /// devices.
    ///
    /// Cold tasks are grouped by series so each series is fetched from the
    /// remote exactly once; the fetched batch is then backfilled into every
    /// device that needed it.
    pub async fn preload_station(
        &self,
        tasks: &[PreloadTask],
        on_progress: Option<ProgressCallback>,
    ) -> PreloadOutcome {
        let cancel = self.current_token();
        let now = now_ms();
        let from = now - self.policy.retention_window_ms;

        let mut progress = ProgressReporter::new(&self.progress_tx, on_progress);
        progress.report(0);

        let mut seen = HashSet::new();
        let cold: Vec<&PreloadTask> = tasks
            .iter()
            .filter(|task| seen.insert((*task).clone()))
            .filter(|task| !self.is_warm(&task.device_id, &task.series_id, now))
            .collect();

        if cold.is_empty() {
            info!("Preload skipped: all {} requested series already warm", tasks.len());
            progress.report(100);
            return PreloadOutcome {
                success: true,
                ..Default::default()
            };
        }

        // One fetch per series, however many devices need the batch
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for task in &cold {
            match groups.iter_mut().find(|entry| entry.0 == task.series_id.as_str()) {
                Some(entry) => entry.1.push(task.device_id.as_str()),
                None => groups.push((task.series_id.as_str(), vec![task.device_id.as_str()])),
            }
        }

        info!(
            "Preloading {} cold series ({} fetches) over the last {} h",
            cold.len(),
            groups.len(),
            self.policy.retention_window_ms / (60 * 60 * 1000)
        );

        let mut outcome = PreloadOutcome {
            success: true,
            ..Default::default()
        };

        match self
            .run_groups(&groups, from, now, &cancel, &mut progress, &mut outcome)
            .await
        {
            Ok(()) => {
                progress.report(100);
                debug!("Preload finished, fetched_anything={}", outcome.fetched_anything);
            }
            Err(e) => {
                warn!("Preload stopped: {e}; partially warmed state is safe to resume");
                outcome.success = false;
            }
        }

        outcome
    }

    async fn run_groups(
        &self,
        groups: &[(&str, Vec<&str>)],
        from: i64,
        to: i64,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter<'_>,
        outcome: &mut PreloadOutcome,
    ) -> Result<()> {
        let total = groups.len();

        for (index, (series_id, devices)) in groups.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            debug!("Preloading series {series_id} ({}/{total})", index + 1);
            match self.remote.fetch_range(series_id, from, to).await {
                Ok(points) if points.is_empty() => {
                    debug!("No remote data for series {series_id}");
                }
                Ok(points) => {
                    outcome.fetched_anything = true;
                    for device_id in devices {
                        if let Err(e) = self.backfill_points(device_id, series_id, &points) {
                            warn!("Preload backfill failed for {device_id}/{series_id}: {e}");
                            outcome.failed_series.push((*series_id).to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!("Preload fetch failed for series {series_id}: {e}");
                    outcome.failed_series.push((*series_id).to_string());
                }
            }

            progress.report((((index + 1) * 100) / total) as u8);
        }

        Ok(())
    }

    fn backfill_points(&self, device_id: &str, series_id: &str, points: &[RemotePoint]) -> Result<usize> {
        let samples: Vec<_> = points
            .iter()
            .cloned()
            .map(|p| p.into_sample(device_id, series_id))
            .collect();
        let written = backfill_batch(&self.store, &samples)?;
        debug!(
            "Preloaded {written} of {} samples into {device_id}/{series_id}",
            points.len()
        );
        Ok(written)
    }

    /// Whether the cache already holds enough recent data for one series.
    ///
    /// Coverage and freshness are checked independently: high coverage with
    /// a stale newest sample is not warm, and vice versa.
    fn is_warm(&self, device_id: &str, series_id: &str, now: i64) -> bool {
        let from = now - self.policy.retention_window_ms;
        let samples = match self.store.query_range(device_id, series_id, from, now) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Warmth check failed for {device_id}/{series_id}: {e}");
                return false;
            }
        };

        let Some(newest) = samples.last().map(|s| s.timestamp) else {
            return false;
        };

        let coverage = coverage_ratio(&samples, from, now);
        let covered = coverage >= self.policy.cache_valid_coverage_ratio;
        let fresh = now - newest <= self.policy.max_cache_age_ms;

        debug!(
            "Warmth for {device_id}/{series_id}: coverage {:.1}% ({}), newest {} min old ({})",
            coverage * 100.0,
            if covered { "ok" } else { "cold" },
            (now - newest) / 60_000,
            if fresh { "fresh" } else { "stale" }
        );

        covered && fresh
    }

    /// Request cooperative cancellation of the current run.
    ///
    /// The run stops before its next work unit; already backfilled series
    /// stay warm.
    pub fn cancel(&self) {
        self.current_token().cancel();
    }

    /// Abort any in-flight run and re-arm the handle for reuse.
    pub fn reset(&self) {
        let mut guard = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.cancel();
        *guard = CancellationToken::new();
        self.progress_tx.send_replace(0);
    }

    /// Observe progress (0–100) without registering a callback.
    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.progress_tx.subscribe()
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Keeps reported progress monotonically non-decreasing across the watch
/// channel and the optional callback.
struct ProgressReporter<'a> {
    last: i16,
    tx: &'a watch::Sender<u8>,
    callback: Option<ProgressCallback>,
}

impl<'a> ProgressReporter<'a> {
    fn new(tx: &'a watch::Sender<u8>, callback: Option<ProgressCallback>) -> Self {
        Self {
            last: -1,
            tx,
            callback,
        }
    }

    fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if i16::from(percent) <= self.last {
            return;
        }
        self.last = i16::from(percent);
        self.tx.send_replace(percent);
        if let Some(callback) = &self.callback {
            callback(percent);
        }
    }
}
