//! Mock remote client for testing.
//!
//! Provides a [`MockRemote`] that implements [`RemoteClient`] without any
//! network, with the knobs the cache tests need:
//!
//! - **Programmable data**: per-series point sets, served range-filtered
//! - **Failure injection**: switch the mock to transport or rejection errors
//! - **Call counting**: assert how many fetches a strategy actually issued
//! - **Latency simulation**: artificial delay for cancellation tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::remote::{RemoteClient, RemotePoint};

/// A mock history service for testing.
#[derive(Default)]
pub struct MockRemote {
    series: RwLock<HashMap<String, Vec<RemotePoint>>>,
    fetch_count: AtomicU32,
    fail_unavailable: AtomicBool,
    fail_rejected: AtomicBool,
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRemote")
            .field("fetch_count", &self.fetch_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockRemote {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored points for one series.
    pub async fn set_series(&self, series_id: &str, points: Vec<RemotePoint>) {
        self.series
            .write()
            .await
            .insert(series_id.to_string(), points);
    }

    /// Number of `fetch_range` calls made so far (including failed ones).
    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Make every fetch fail with [`Error::RemoteUnavailable`].
    pub fn set_unavailable(&self, fail: bool) {
        self.fail_unavailable.store(fail, Ordering::SeqCst);
    }

    /// Make every fetch fail with [`Error::RemoteRejected`].
    pub fn set_rejected(&self, fail: bool) {
        self.fail_rejected.store(fail, Ordering::SeqCst);
    }

    /// Delay every fetch by the given duration.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Evenly spaced points over `[from, to]` inclusive, `step_ms` apart.
    pub fn points_every(from: i64, to: i64, step_ms: i64, value: f64) -> Vec<RemotePoint> {
        let mut points = Vec::new();
        let mut ts = from;
        while ts <= to {
            points.push(RemotePoint {
                timestamp: ts,
                values: vec![value],
                base_index: 0,
            });
            ts += step_ms;
        }
        points
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn fetch_range(&self, series_id: &str, from: i64, to: i64) -> Result<Vec<RemotePoint>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.fail_unavailable.load(Ordering::SeqCst) {
            return Err(Error::RemoteUnavailable {
                message: "mock offline".into(),
            });
        }
        if self.fail_rejected.load(Ordering::SeqCst) {
            return Err(Error::RemoteRejected {
                message: format!("unknown series: {series_id}"),
            });
        }

        let series = self.series.read().await;
        let mut points: Vec<RemotePoint> = series
            .get(series_id)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= from && p.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        points.sort_by_key(|p| p.timestamp);

        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_range_filtered_points() {
        let mock = MockRemote::new();
        mock.set_series("rec-1", MockRemote::points_every(0, 10_000, 1_000, 5.0))
            .await;

        let points = mock.fetch_range("rec-1", 2_000, 4_000).await.unwrap();
        let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![2_000, 3_000, 4_000]);
        assert_eq!(mock.fetch_count(), 1);
    }

    #[tokio::test]
    async fn unknown_series_is_empty() {
        let mock = MockRemote::new();
        let points = mock.fetch_range("nope", 0, 1_000).await.unwrap();
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn failure_injection() {
        let mock = MockRemote::new();
        mock.set_unavailable(true);
        let err = mock.fetch_range("rec-1", 0, 1_000).await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable { .. }));

        mock.set_unavailable(false);
        mock.set_rejected(true);
        let err = mock.fetch_range("rec-1", 0, 1_000).await.unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { .. }));

        // Failed calls still count
        assert_eq!(mock.fetch_count(), 2);
    }

    #[test]
    fn points_every_is_inclusive() {
        let points = MockRemote::points_every(0, 3_000, 1_000, 1.0);
        assert_eq!(points.len(), 4);
        assert_eq!(points.last().unwrap().timestamp, 3_000);
    }
}
