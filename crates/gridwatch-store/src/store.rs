//! Main store implementation.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::{debug, info};

use gridwatch_types::Sample;

use crate::error::{Error, Result};
use crate::schema;

/// Coarse statistics for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Total samples across all devices and series.
    pub total_samples: u64,
}

/// SQLite-based local store for gridwatch samples.
///
/// The store owns its synchronization: the connection sits behind an internal
/// mutex and the handle is cheaply cloneable, so the ingest path, the
/// preloader, and the resolver can all hold the same store without any
/// locking of their own.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
}

const UPSERT_SQL: &str = "INSERT INTO samples \
     (device_id, series_id, timestamp, vals, base_index, success, cached_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
     ON CONFLICT(device_id, series_id, timestamp) DO UPDATE SET \
        vals = excluded.vals, \
        base_index = excluded.base_index, \
        success = excluded.success, \
        cached_at = excluded.cached_at";

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening sample cache at {}", path.display());
        let conn = Connection::open(path)?;

        // WAL mode keeps readers unblocked while the ingest path writes
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self::wrap(conn))
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
            }),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves no partial SQLite state, so a
        // poisoned lock is still safe to reuse.
        self.inner.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upsert a single sample. A duplicate `(device, series, timestamp)` key
    /// overwrites the previous row.
    pub fn put(&self, sample: &Sample) -> Result<()> {
        let vals = serde_json::to_string(&sample.values)?;
        self.conn().execute(
            UPSERT_SQL,
            rusqlite::params![
                sample.device_id,
                sample.series_id,
                sample.timestamp,
                vals,
                sample.base_index,
                sample.success,
                now_ms(),
            ],
        )?;
        Ok(())
    }

    /// Upsert a batch of samples in one transaction.
    ///
    /// The batch is atomic: either every sample lands or none do.
    pub fn put_batch(&self, samples: &[Sample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        let cached_at = now_ms();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for sample in samples {
                let vals = serde_json::to_string(&sample.values)?;
                stmt.execute(rusqlite::params![
                    sample.device_id,
                    sample.series_id,
                    sample.timestamp,
                    vals,
                    sample.base_index,
                    sample.success,
                    cached_at,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Stored batch of {} samples", samples.len());
        Ok(samples.len())
    }

    /// Samples for one series with `from <= timestamp <= to`, ascending.
    pub fn query_range(
        &self,
        device_id: &str,
        series_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Sample>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT timestamp, vals, base_index, success FROM samples \
                 WHERE device_id = ?1 AND series_id = ?2 \
                   AND timestamp >= ?3 AND timestamp <= ?4 \
                 ORDER BY timestamp ASC",
            )?;
            stmt.query_map(rusqlite::params![device_id, series_id, from, to], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|(timestamp, vals, base_index, success)| {
                Ok(Sample {
                    device_id: device_id.to_string(),
                    series_id: series_id.to_string(),
                    timestamp,
                    values: serde_json::from_str(&vals)?,
                    base_index: base_index as u32,
                    success,
                })
            })
            .collect()
    }

    /// Timestamps already present for one series within `[from, to]`.
    ///
    /// Index-backed; used by the backfill path to skip redundant writes.
    pub fn existing_timestamps(
        &self,
        device_id: &str,
        series_id: &str,
        from: i64,
        to: i64,
    ) -> Result<HashSet<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp FROM samples \
             WHERE device_id = ?1 AND series_id = ?2 \
               AND timestamp >= ?3 AND timestamp <= ?4",
        )?;
        let timestamps = stmt
            .query_map(rusqlite::params![device_id, series_id, from, to], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<std::result::Result<HashSet<_>, _>>()?;

        Ok(timestamps)
    }

    /// Timestamp of the freshest sample for one series, if any.
    pub fn latest_timestamp(&self, device_id: &str, series_id: &str) -> Result<Option<i64>> {
        let ts = self.conn().query_row(
            "SELECT MAX(timestamp) FROM samples WHERE device_id = ?1 AND series_id = ?2",
            rusqlite::params![device_id, series_id],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    /// Timestamp of the oldest sample for one series, if any.
    pub fn earliest_timestamp(&self, device_id: &str, series_id: &str) -> Result<Option<i64>> {
        let ts = self.conn().query_row(
            "SELECT MIN(timestamp) FROM samples WHERE device_id = ?1 AND series_id = ?2",
            rusqlite::params![device_id, series_id],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    /// Delete all samples older than `cutoff` (exclusive). Returns the count
    /// of evicted rows.
    pub fn evict_older_than(&self, cutoff: i64) -> Result<usize> {
        let evicted = self
            .conn()
            .execute("DELETE FROM samples WHERE timestamp < ?1", [cutoff])?;
        if evicted > 0 {
            info!("Evicted {evicted} samples older than {cutoff}");
        }
        Ok(evicted)
    }

    /// Total stored samples.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Stored samples for one device, across all its series.
    pub fn count_for_device(&self, device_id: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM samples WHERE device_id = ?",
            [device_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Coarse statistics for diagnostics.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            total_samples: self.count()?,
        })
    }

    /// Remove every stored sample. Exposed for testing and troubleshooting.
    pub fn clear_all(&self) -> Result<()> {
        self.conn().execute("DELETE FROM samples", [])?;
        info!("Cleared all cached samples");
        Ok(())
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
