//! End-to-end tests for the hybrid cache over an in-memory store and a mock
//! remote history service.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use gridwatch_cache::{
    HistoryCache, IngestReading, MockRemote, PreloadTask, ProgressCallback,
};
use gridwatch_store::Store;
use gridwatch_types::{QueryRange, RetentionPolicy, Sample, SourceTag};

const MINUTE: i64 = 60_000;
const HOUR: i64 = 60 * MINUTE;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Wall-clock "now", aligned down to a minute so locally written samples and
/// mock remote points land on identical timestamps.
fn aligned_now() -> i64 {
    (now_ms() / MINUTE) * MINUTE
}

fn setup() -> (HistoryCache, Arc<MockRemote>) {
    let store = Store::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    let cache = HistoryCache::attach(store, remote.clone(), RetentionPolicy::default());
    (cache, remote)
}

fn local_sample(device: &str, series: &str, timestamp: i64, value: f64) -> Sample {
    Sample {
        device_id: device.to_string(),
        series_id: series.to_string(),
        timestamp,
        values: vec![value],
        base_index: 0,
        success: true,
    }
}

fn put_every(store: &Store, device: &str, series: &str, from: i64, to: i64, step: i64) {
    let mut samples = Vec::new();
    let mut ts = from;
    while ts <= to {
        samples.push(local_sample(device, series, ts, 1.0));
        ts += step;
    }
    store.put_batch(&samples).unwrap();
}

fn assert_strictly_increasing(samples: &[Sample]) {
    for pair in samples.windows(2) {
        assert!(
            pair[0].timestamp < pair[1].timestamp,
            "duplicate or out-of-order timestamp {} -> {}",
            pair[0].timestamp,
            pair[1].timestamp
        );
    }
}

// === Resolver scenarios ===

#[tokio::test]
async fn scenario_a_empty_local_goes_remote_then_serves_local() {
    let (cache, remote) = setup();
    let now = aligned_now();
    let range = QueryRange::new("feeder-1", "rec-9", now - 2 * HOUR, now).unwrap();

    remote
        .set_series("rec-9", MockRemote::points_every(range.from, range.to, 5 * MINUTE, 7.0))
        .await;

    let first = cache.resolve(&range, false).await;
    assert_eq!(first.source, SourceTag::Remote);
    assert_eq!(first.samples.len(), 25);
    assert_eq!(remote.fetch_count(), 1);

    // Backfill made the second identical query local: coverage is now 100%
    let second = cache.resolve(&range, false).await;
    assert_eq!(second.source, SourceTag::Local);
    assert_eq!(second.samples.len(), 25);
    assert_eq!(remote.fetch_count(), 1);
}

#[tokio::test]
async fn scenario_b_low_coverage_completes_from_remote_as_mixed() {
    let (cache, remote) = setup();
    let now = aligned_now();
    let range = QueryRange::new("feeder-1", "rec-9", now - 24 * HOUR, now).unwrap();

    // Local data covers only the most recent ~10% of the window
    put_every(
        cache.store(),
        "feeder-1",
        "rec-9",
        now - 144 * MINUTE,
        now,
        30 * MINUTE,
    );
    // The remote has the whole window, on the same timestamp grid
    remote
        .set_series("rec-9", MockRemote::points_every(range.from, range.to, 30 * MINUTE, 2.0))
        .await;

    let resolved = cache.resolve(&range, false).await;
    assert_eq!(resolved.source, SourceTag::Mixed);
    assert_eq!(remote.fetch_count(), 1);
    assert_strictly_increasing(&resolved.samples);

    // The merged result reaches back to the start of the window
    assert!(resolved.samples.first().unwrap().timestamp <= range.from + 30 * MINUTE);
    assert!(resolved.samples.last().unwrap().timestamp >= range.to - 30 * MINUTE);
}

#[tokio::test]
async fn scenario_c_force_local_only_never_calls_remote() {
    let (cache, remote) = setup();
    let now = aligned_now();
    let range = QueryRange::new("feeder-1", "rec-9", now - 6 * HOUR, now).unwrap();

    remote
        .set_series("rec-9", MockRemote::points_every(range.from, range.to, 5 * MINUTE, 1.0))
        .await;

    let resolved = cache.resolve(&range, true).await;
    assert_eq!(resolved.source, SourceTag::Local);
    assert!(resolved.samples.is_empty());
    assert!(resolved.error.is_none());
    assert_eq!(remote.fetch_count(), 0);
}

#[tokio::test]
async fn span_over_retention_is_always_remote_only() {
    let (cache, remote) = setup();
    let policy = cache.policy();
    let now = aligned_now();

    // Local data is warm over the whole window, and the caller even asks
    // for local-only; one extra millisecond of span still forces remote.
    put_every(cache.store(), "feeder-1", "rec-9", now - 48 * HOUR, now, 30 * MINUTE);
    let over = QueryRange::new(
        "feeder-1",
        "rec-9",
        now - policy.retention_window_ms - 1,
        now,
    )
    .unwrap();
    remote
        .set_series("rec-9", MockRemote::points_every(over.from, over.to, 30 * MINUTE, 1.0))
        .await;

    let resolved = cache.resolve(&over, true).await;
    assert_eq!(resolved.source, SourceTag::Remote);
    assert_eq!(remote.fetch_count(), 1);

    // A span of exactly the retention window is never remote-only on that
    // basis alone
    let exact = QueryRange::new("feeder-1", "rec-9", now - policy.retention_window_ms, now).unwrap();
    let resolved = cache.resolve(&exact, true).await;
    assert_eq!(resolved.source, SourceTag::Local);
    assert_eq!(remote.fetch_count(), 1);
}

#[tokio::test]
async fn straddling_range_splits_at_boundary() {
    let (cache, remote) = setup();
    let now = aligned_now();
    // Span fits the retention window but starts before the local boundary
    let range = QueryRange::new("feeder-1", "rec-9", now - 49 * HOUR, now - HOUR).unwrap();

    // Local data covers the retained part of the range, reaching slightly
    // past the boundary so both sub-fetches share timestamps there
    put_every(
        cache.store(),
        "feeder-1",
        "rec-9",
        now - 48 * HOUR - 10 * MINUTE,
        range.to,
        MINUTE,
    );
    // The remote holds everything, same grid
    remote
        .set_series("rec-9", MockRemote::points_every(range.from, range.to, MINUTE, 3.0))
        .await;

    let resolved = cache.resolve(&range, false).await;
    assert_eq!(resolved.source, SourceTag::Mixed);
    // Recent part came from local, so only the old part hit the remote
    assert_eq!(remote.fetch_count(), 1);

    // No duplicate at the boundary, no gap across it
    assert_strictly_increasing(&resolved.samples);
    assert_eq!(resolved.samples.first().unwrap().timestamp, range.from);
    assert_eq!(resolved.samples.last().unwrap().timestamp, range.to);
    for pair in resolved.samples.windows(2) {
        assert!(
            pair[1].timestamp - pair[0].timestamp <= 2 * MINUTE,
            "gap across the retention boundary"
        );
    }
}

#[tokio::test]
async fn straddling_range_falls_back_to_remote_for_recent_part() {
    let (cache, remote) = setup();
    let now = aligned_now();
    let range = QueryRange::new("feeder-1", "rec-9", now - 49 * HOUR, now - HOUR).unwrap();

    remote
        .set_series("rec-9", MockRemote::points_every(range.from, range.to, 10 * MINUTE, 3.0))
        .await;

    let resolved = cache.resolve(&range, false).await;
    assert_eq!(resolved.source, SourceTag::Mixed);
    // Old part and recent-part fallback are separate fetches
    assert_eq!(remote.fetch_count(), 2);
    assert_strictly_increasing(&resolved.samples);
    assert_eq!(resolved.samples.first().unwrap().timestamp, range.from);
    assert!(resolved.samples.last().unwrap().timestamp >= range.to - 10 * MINUTE);
}

#[tokio::test]
async fn remote_failure_surfaces_as_error_result() {
    let (cache, remote) = setup();
    let now = aligned_now();
    let range = QueryRange::new("feeder-1", "rec-9", now - 2 * HOUR, now).unwrap();

    remote.set_unavailable(true);

    let resolved = cache.resolve(&range, false).await;
    assert_eq!(resolved.source, SourceTag::Error);
    assert!(resolved.samples.is_empty());
    assert!(resolved.error.as_ref().unwrap().is_transient());
}

#[tokio::test]
async fn cached_out_of_window_data_never_needs_the_remote() {
    let (cache, remote) = setup();
    let now = aligned_now();

    // Written after the startup sweep, older than retention
    put_every(
        cache.store(),
        "feeder-1",
        "rec-9",
        now - 60 * HOUR,
        now - 55 * HOUR,
        10 * MINUTE,
    );
    remote.set_unavailable(true);

    let range = QueryRange::new("feeder-1", "rec-9", now - 60 * HOUR, now - 55 * HOUR).unwrap();
    let resolved = cache.resolve(&range, false).await;

    assert_eq!(resolved.source, SourceTag::Local);
    assert!(!resolved.samples.is_empty());
    assert_eq!(remote.fetch_count(), 0);
}

// === Preloader scenarios ===

fn collect_progress() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    let callback: ProgressCallback = Arc::new(move |pct| sink.lock().unwrap().push(pct));
    (callback, reported)
}

#[tokio::test]
async fn scenario_d_second_preload_skips_warm_series() {
    let (cache, remote) = setup();
    let now = aligned_now();

    remote
        .set_series(
            "rec-9",
            MockRemote::points_every(now - 48 * HOUR + MINUTE, now, 10 * MINUTE, 5.0),
        )
        .await;

    let (callback, reported) = collect_progress();
    let first = cache
        .preloader()
        .preload("feeder-1", &["rec-9".to_string()], Some(callback))
        .await;
    assert!(first.success);
    assert!(first.fetched_anything);
    assert!(first.failed_series.is_empty());
    assert_eq!(remote.fetch_count(), 1);
    assert_eq!(reported.lock().unwrap().last(), Some(&100));

    // Nothing ingested in between: the cache is warm and fresh, so the
    // second run performs zero fetches and reports 100% immediately
    let (callback, reported) = collect_progress();
    let second = cache
        .preloader()
        .preload("feeder-1", &["rec-9".to_string()], Some(callback))
        .await;
    assert!(second.success);
    assert!(!second.fetched_anything);
    assert_eq!(remote.fetch_count(), 1);
    assert_eq!(*reported.lock().unwrap(), vec![0, 100]);
}

#[tokio::test]
async fn preload_dedups_roles_sharing_a_series() {
    let (cache, remote) = setup();
    let now = aligned_now();

    remote
        .set_series(
            "rec-9",
            MockRemote::points_every(now - 48 * HOUR + MINUTE, now, 10 * MINUTE, 5.0),
        )
        .await;

    // Two display roles backed by the same feed: one fetch, one write
    let outcome = cache
        .preloader()
        .preload("feeder-1", &["rec-9".to_string(), "rec-9".to_string()], None)
        .await;

    assert!(outcome.success);
    assert_eq!(remote.fetch_count(), 1);
}

#[tokio::test]
async fn preload_continues_past_a_failing_series() {
    let (cache, remote) = setup();
    let now = aligned_now();

    remote.set_rejected(true);

    let outcome = cache
        .preloader()
        .preload(
            "feeder-1",
            &["rec-1".to_string(), "rec-2".to_string()],
            None,
        )
        .await;

    // Failures are recorded, the run itself still completes
    assert!(outcome.success);
    assert!(!outcome.fetched_anything);
    assert_eq!(outcome.failed_series, vec!["rec-1", "rec-2"]);
    assert_eq!(remote.fetch_count(), 2);

    // The series stayed cold, so a later run retries them
    remote.set_rejected(false);
    remote
        .set_series(
            "rec-1",
            MockRemote::points_every(now - 48 * HOUR + MINUTE, now, 10 * MINUTE, 5.0),
        )
        .await;
    let retry = cache
        .preloader()
        .preload("feeder-1", &["rec-1".to_string()], None)
        .await;
    assert!(retry.success);
    assert!(retry.fetched_anything);
    assert!(retry.failed_series.is_empty());
}

#[tokio::test]
async fn preload_cancellation_keeps_partial_state_resumable() {
    let store = Store::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    let cache = Arc::new(HistoryCache::attach(
        store,
        remote.clone(),
        RetentionPolicy::default(),
    ));
    let now = aligned_now();

    for series in ["rec-1", "rec-2"] {
        remote
            .set_series(
                series,
                MockRemote::points_every(now - 48 * HOUR + MINUTE, now, 10 * MINUTE, 5.0),
            )
            .await;
    }

    // Cancel from the progress callback once the first unit completes (50%)
    let canceller = cache.clone();
    let callback: ProgressCallback = Arc::new(move |pct| {
        if pct == 50 {
            canceller.preloader().cancel();
        }
    });

    let series = vec!["rec-1".to_string(), "rec-2".to_string()];
    let outcome = cache.preloader().preload("feeder-1", &series, Some(callback)).await;

    assert!(!outcome.success);
    assert_eq!(remote.fetch_count(), 1);
    // The first series was backfilled atomically before cancellation
    assert!(cache.store().count_for_device("feeder-1").unwrap() > 0);

    // Re-arm and resume: only the cold series is fetched
    cache.preloader().reset();
    let outcome = cache.preloader().preload("feeder-1", &series, None).await;
    assert!(outcome.success);
    assert_eq!(remote.fetch_count(), 2);
}

#[tokio::test]
async fn cancelled_handle_stays_cancelled_until_reset() {
    let (cache, remote) = setup();
    let now = aligned_now();
    remote
        .set_series(
            "rec-1",
            MockRemote::points_every(now - 48 * HOUR + MINUTE, now, 10 * MINUTE, 5.0),
        )
        .await;

    cache.preloader().cancel();
    let outcome = cache
        .preloader()
        .preload("feeder-1", &["rec-1".to_string()], None)
        .await;
    assert!(!outcome.success);
    assert_eq!(remote.fetch_count(), 0);

    cache.preloader().reset();
    let outcome = cache
        .preloader()
        .preload("feeder-1", &["rec-1".to_string()], None)
        .await;
    assert!(outcome.success);
    assert_eq!(remote.fetch_count(), 1);
}

#[tokio::test]
async fn station_preload_fetches_shared_series_once() {
    let (cache, remote) = setup();
    let now = aligned_now();

    for series in ["shared-1", "own-1"] {
        remote
            .set_series(
                series,
                MockRemote::points_every(now - 48 * HOUR + MINUTE, now, 10 * MINUTE, 5.0),
            )
            .await;
    }

    let tasks = vec![
        PreloadTask {
            device_id: "feeder-1".into(),
            series_id: "shared-1".into(),
        },
        PreloadTask {
            device_id: "feeder-2".into(),
            series_id: "shared-1".into(),
        },
        PreloadTask {
            device_id: "feeder-1".into(),
            series_id: "own-1".into(),
        },
    ];

    let outcome = cache.preloader().preload_station(&tasks, None).await;
    assert!(outcome.success);
    assert!(outcome.fetched_anything);

    // One fetch per unique series, but both devices got the shared batch
    assert_eq!(remote.fetch_count(), 2);
    assert!(cache.store().count_for_device("feeder-1").unwrap() > 0);
    assert!(cache.store().count_for_device("feeder-2").unwrap() > 0);
}

// === Ingest and lifecycle ===

#[tokio::test]
async fn ingested_readings_are_visible_to_the_resolver() {
    let (cache, remote) = setup();
    let now = aligned_now();

    cache.ingest(
        "feeder-1",
        "rec-9",
        IngestReading {
            timestamp: Some(now - MINUTE),
            values: vec![230.0],
            base_index: 0,
            success: true,
        },
    );

    let range = QueryRange::new("feeder-1", "rec-9", now - 2 * MINUTE, now).unwrap();
    let resolved = cache.resolve(&range, true).await;

    assert_eq!(resolved.source, SourceTag::Local);
    assert_eq!(resolved.samples.len(), 1);
    assert_eq!(remote.fetch_count(), 0);
}

#[tokio::test]
async fn evict_expired_and_clear_all() {
    let (cache, _remote) = setup();
    let now = aligned_now();

    // One sample inside the window, one far outside it
    cache.store().put(&local_sample("feeder-1", "rec-9", now - HOUR, 1.0)).unwrap();
    cache
        .store()
        .put(&local_sample("feeder-1", "rec-9", now - 100 * HOUR, 1.0))
        .unwrap();
    assert_eq!(cache.stats().unwrap().total_samples, 2);

    assert_eq!(cache.evict_expired().unwrap(), 1);
    assert_eq!(cache.stats().unwrap().total_samples, 1);

    cache.clear_all().unwrap();
    assert_eq!(cache.stats().unwrap().total_samples, 0);
}
