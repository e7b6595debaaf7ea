//! Coverage math shared by the resolver and the preloader.

use gridwatch_types::Sample;

/// Fraction of `[from, to]` that local data actually covers, measured from
/// the earliest local sample to the range end and clamped to `0.0..=1.0`.
///
/// An empty slice covers nothing. Adding samples can only move the earliest
/// timestamp backwards, so the ratio never decreases as data accumulates.
#[must_use]
pub fn coverage_ratio(samples: &[Sample], from: i64, to: i64) -> f64 {
    let Some(earliest) = samples.iter().map(|s| s.timestamp).min() else {
        return 0.0;
    };
    let span = to - from;
    if span <= 0 {
        return 0.0;
    }
    let covered = to - earliest;
    (covered as f64 / span as f64).clamp(0.0, 1.0)
}
