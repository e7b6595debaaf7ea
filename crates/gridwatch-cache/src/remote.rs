//! Remote history service interface.
//!
//! The remote store is the authoritative source: it holds the full history,
//! while the local store only ever covers the retention window. This module
//! defines the client seam ([`RemoteClient`]) and the wire sample shape.
//!
//! No retry policy lives here. Retries, if any, belong to the callers
//! (resolver, preloader), which want different backoff behavior.

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use gridwatch_types::Sample;

use crate::error::Result;

/// One sample as returned by the remote history service.
///
/// Carries no device/series scoping; that context lives in the request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemotePoint {
    /// Capture time, normalized to milliseconds since the Unix epoch. The
    /// wire may carry either integer milliseconds or an RFC 3339 string.
    #[serde(deserialize_with = "timestamp_ms")]
    pub timestamp: i64,
    /// Raw register values.
    pub values: Vec<f64>,
    /// Register offset of `values[0]`.
    #[serde(default, alias = "baseIndex")]
    pub base_index: u32,
}

impl RemotePoint {
    /// Scope this point to a device/series, producing a storable sample.
    ///
    /// Remote history only records successful reads, so `success` is true.
    #[must_use]
    pub fn into_sample(self, device_id: &str, series_id: &str) -> Sample {
        Sample {
            device_id: device_id.to_string(),
            series_id: series_id.to_string(),
            timestamp: self.timestamp,
            values: self.values,
            base_index: self.base_index,
            success: true,
        }
    }
}

fn timestamp_ms<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Millis(i64),
        Text(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::Millis(ms) => Ok(ms),
        Wire::Text(s) => {
            let parsed = OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)?;
            Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
        }
    }
}

/// Interface to the authoritative historical-data source.
///
/// Assumed idempotent and side-effect-free: fetching the same range twice
/// returns the same samples.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Samples for one series with `from <= timestamp <= to` (both in ms
    /// since epoch, inclusive), ascending by timestamp.
    ///
    /// Fails with [`crate::Error::RemoteUnavailable`] on transport errors
    /// and [`crate::Error::RemoteRejected`] on an invalid range or unknown
    /// series.
    async fn fetch_range(&self, series_id: &str, from: i64, to: i64) -> Result<Vec<RemotePoint>>;
}
