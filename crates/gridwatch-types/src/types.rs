//! Core types for gridwatch sample data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::RangeError;

/// One captured set of register values for a series at a point in time.
///
/// Samples are uniquely identified by `(device_id, series_id, timestamp)`;
/// storing a second sample under the same key replaces the first.
///
/// A sample may represent a failed read attempt (`success == false`). Failed
/// samples are kept for error-rate tracking; excluding them from value
/// computations is the consumer's job, not the cache's.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// Device (feeder) this sample belongs to.
    pub device_id: String,
    /// Logical series (recorder feed) within the device.
    pub series_id: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Raw register values at capture time.
    pub values: Vec<f64>,
    /// Register offset of `values[0]`, so consumers can map vector
    /// positions back to physical registers.
    #[cfg_attr(feature = "serde", serde(default))]
    pub base_index: u32,
    /// Whether the read attempt succeeded.
    #[cfg_attr(feature = "serde", serde(default = "default_success"))]
    pub success: bool,
}

#[cfg(feature = "serde")]
fn default_success() -> bool {
    true
}

/// A time-range query against one series.
///
/// Both bounds are inclusive, in milliseconds since the Unix epoch. The same
/// inclusive convention applies to local scans and remote fetches so merged
/// results never double-count a boundary sample.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueryRange {
    pub device_id: String,
    pub series_id: String,
    /// Range start (inclusive), ms since epoch.
    pub from: i64,
    /// Range end (inclusive), ms since epoch.
    pub to: i64,
}

impl QueryRange {
    /// Create a range, validating `from < to`.
    pub fn new(
        device_id: impl Into<String>,
        series_id: impl Into<String>,
        from: i64,
        to: i64,
    ) -> Result<Self, RangeError> {
        if from >= to {
            return Err(RangeError::Empty { from, to });
        }
        Ok(Self {
            device_id: device_id.into(),
            series_id: series_id.into(),
            from,
            to,
        })
    }

    /// Requested span in milliseconds.
    #[must_use]
    pub fn span_ms(&self) -> i64 {
        self.to - self.from
    }
}

/// Where the data in a resolved query came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SourceTag {
    /// Served entirely from the local store.
    Local,
    /// Served entirely from the remote history service.
    Remote,
    /// Merged from both sources.
    Mixed,
    /// The query failed; the result carries the underlying error and no
    /// samples. Distinguishable from an empty `Local` result.
    Error,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceTag::Local => "local",
            SourceTag::Remote => "remote",
            SourceTag::Mixed => "mixed",
            SourceTag::Error => "error",
        };
        f.write_str(s)
    }
}

/// Process-wide cache tuning constants, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetentionPolicy {
    /// How far back the local store is expected to hold data.
    pub retention_window_ms: i64,
    /// Extra slack subtracted from the retention boundary so a query whose
    /// `from` lands exactly on the boundary does not flap between
    /// strategies.
    pub safety_margin_ms: i64,
    /// Coverage ratio at or above which the preloader treats a series as
    /// already warm.
    pub cache_valid_coverage_ratio: f64,
    /// Coverage ratio at or above which the resolver serves local results
    /// without a remote call.
    pub query_backfill_coverage_ratio: f64,
    /// Maximum age of the freshest local sample before the preloader treats
    /// the cache as stale even when coverage is high.
    pub max_cache_age_ms: i64,
}

const HOUR_MS: i64 = 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_window_ms: 48 * HOUR_MS,
            safety_margin_ms: 5 * MINUTE_MS,
            cache_valid_coverage_ratio: 0.85,
            query_backfill_coverage_ratio: 0.90,
            max_cache_age_ms: 15 * MINUTE_MS,
        }
    }
}

impl RetentionPolicy {
    /// Whether a requested span categorically exceeds what the local store
    /// can ever hold.
    #[must_use]
    pub fn exceeds_retention(&self, span_ms: i64) -> bool {
        span_ms > self.retention_window_ms
    }

    /// Oldest timestamp the local store is trusted to cover, relative to
    /// `now_ms`. Includes the safety margin.
    #[must_use]
    pub fn local_boundary(&self, now_ms: i64) -> i64 {
        now_ms - self.retention_window_ms - self.safety_margin_ms
    }
}

/// Predefined query spans offered to consumers (chart range pickers, CLI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RangePreset {
    Hours1,
    Hours2,
    Hours6,
    Hours12,
    Hours24,
    Hours48,
    Days7,
}

impl RangePreset {
    /// All presets, shortest first.
    pub const ALL: [RangePreset; 7] = [
        RangePreset::Hours1,
        RangePreset::Hours2,
        RangePreset::Hours6,
        RangePreset::Hours12,
        RangePreset::Hours24,
        RangePreset::Hours48,
        RangePreset::Days7,
    ];

    /// Span of the preset in milliseconds.
    #[must_use]
    pub fn span_ms(self) -> i64 {
        match self {
            RangePreset::Hours1 => HOUR_MS,
            RangePreset::Hours2 => 2 * HOUR_MS,
            RangePreset::Hours6 => 6 * HOUR_MS,
            RangePreset::Hours12 => 12 * HOUR_MS,
            RangePreset::Hours24 => 24 * HOUR_MS,
            RangePreset::Hours48 => 48 * HOUR_MS,
            RangePreset::Days7 => 7 * 24 * HOUR_MS,
        }
    }

    /// Short label, e.g. `"24h"`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            RangePreset::Hours1 => "1h",
            RangePreset::Hours2 => "2h",
            RangePreset::Hours6 => "6h",
            RangePreset::Hours12 => "12h",
            RangePreset::Hours24 => "24h",
            RangePreset::Hours48 => "48h",
            RangePreset::Days7 => "7d",
        }
    }

    /// Parse a label such as `"24h"` or `"7d"` (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|p| p.label() == s)
    }
}

impl fmt::Display for RangePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
