//! Dedup-aware backfill of remotely fetched samples into the local store.

use gridwatch_store::Store;
use gridwatch_types::Sample;
use tracing::debug;

use crate::error::Result;

/// Write a remotely fetched batch into the store, skipping timestamps that
/// are already present.
///
/// Every sample in the batch must belong to the same `(device, series)`
/// pair; the dedup lookup is scoped to the first sample's pair and the
/// timestamp span of the batch.
///
/// Idempotent: backfilling the same batch twice leaves the store unchanged.
/// Racing the live ingest path is safe too — a timestamp the ingest path
/// wrote first is skipped here, keeping the fresher live sample. Returns the
/// number of samples actually written.
pub fn backfill_batch(store: &Store, samples: &[Sample]) -> Result<usize> {
    let Some(first) = samples.first() else {
        return Ok(0);
    };

    let mut from = first.timestamp;
    let mut to = first.timestamp;
    for sample in samples {
        from = from.min(sample.timestamp);
        to = to.max(sample.timestamp);
    }

    let existing = store.existing_timestamps(&first.device_id, &first.series_id, from, to)?;
    let fresh: Vec<Sample> = samples
        .iter()
        .filter(|s| !existing.contains(&s.timestamp))
        .cloned()
        .collect();

    if fresh.is_empty() {
        debug!(
            "Backfill for {}/{} skipped: all {} timestamps already cached",
            first.device_id,
            first.series_id,
            samples.len()
        );
        return Ok(0);
    }

    let written = store.put_batch(&fresh)?;
    debug!(
        "Backfilled {written} of {} fetched samples for {}/{}",
        samples.len(),
        first.device_id,
        first.series_id
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(timestamps: &[i64], value: f64) -> Vec<Sample> {
        timestamps
            .iter()
            .map(|&timestamp| Sample {
                device_id: "dev".into(),
                series_id: "ser".into(),
                timestamp,
                values: vec![value],
                base_index: 0,
                success: true,
            })
            .collect()
    }

    #[test]
    fn writes_fresh_batch() {
        let store = Store::open_in_memory().unwrap();
        let written = backfill_batch(&store, &batch(&[1_000, 2_000, 3_000], 1.0)).unwrap();
        assert_eq!(written, 3);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn backfill_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let samples = batch(&[1_000, 2_000, 3_000], 1.0);

        backfill_batch(&store, &samples).unwrap();
        let second = backfill_batch(&store, &samples).unwrap();

        assert_eq!(second, 0);
        assert_eq!(store.count().unwrap(), 3);
        let stored = store.query_range("dev", "ser", 0, 10_000).unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[test]
    fn live_ingested_sample_is_not_overwritten() {
        let store = Store::open_in_memory().unwrap();

        // The live poll path already wrote a fresher value at t=2000
        let live = &batch(&[2_000], 99.0)[0];
        store.put(live).unwrap();

        backfill_batch(&store, &batch(&[1_000, 2_000, 3_000], 1.0)).unwrap();

        let stored = store.query_range("dev", "ser", 0, 10_000).unwrap();
        assert_eq!(stored.len(), 3);
        let at_2000 = stored.iter().find(|s| s.timestamp == 2_000).unwrap();
        assert_eq!(at_2000.values, vec![99.0]);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(backfill_batch(&store, &[]).unwrap(), 0);
    }
}
