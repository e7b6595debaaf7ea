//! Live ingestion write path.

use tracing::debug;

use gridwatch_store::Store;
use gridwatch_types::Sample;

use crate::now_ms;

/// A freshly observed reading from the device-polling collaborator.
///
/// Failed read attempts are ingested too (`success == false`) so consumers
/// can track error rates over time.
#[derive(Debug, Clone)]
pub struct IngestReading {
    /// Capture time in ms since epoch; `None` means "now".
    pub timestamp: Option<i64>,
    /// Raw register values (empty for a failed read).
    pub values: Vec<f64>,
    /// Register offset of `values[0]`.
    pub base_index: u32,
    /// Whether the read attempt succeeded.
    pub success: bool,
}

/// Best-effort writer used by live polling to append fresh samples.
#[derive(Clone)]
pub struct IngestWriter {
    store: Store,
}

impl IngestWriter {
    /// Create a writer over a shared store handle.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append one observed reading.
    ///
    /// Never fails: losing a single cache write must not interrupt live
    /// polling, so store errors are logged and swallowed. This is the only
    /// component allowed to fail silently.
    pub fn ingest(&self, device_id: &str, series_id: &str, reading: IngestReading) {
        let sample = Sample {
            device_id: device_id.to_string(),
            series_id: series_id.to_string(),
            timestamp: reading.timestamp.unwrap_or_else(now_ms),
            values: reading.values,
            base_index: reading.base_index,
            success: reading.success,
        };

        if let Err(e) = self.store.put(&sample) {
            // debug, not warn: a wedged store would otherwise flood the
            // poll-tick logs
            debug!("Dropped ingest write for {device_id}/{series_id}: {e}");
        }
    }
}
