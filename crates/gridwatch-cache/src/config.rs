//! Configuration for the hybrid cache.
//!
//! Loaded from a TOML file; every field has a default so an empty (or
//! missing) file yields a working configuration:
//!
//! ```toml
//! [store]
//! path = "/var/lib/gridwatch/cache.db"
//!
//! [remote]
//! base_url = "http://history.example.net:8080"
//! request_timeout_secs = 10
//!
//! [retention]
//! window_hours = 48
//! safety_margin_secs = 300
//! warm_coverage_ratio = 0.85
//! query_coverage_ratio = 0.90
//! max_cache_age_minutes = 15
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gridwatch_types::RetentionPolicy;

use crate::error::{Error, Result};

/// Top-level cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    pub retention: RetentionConfig,
}

/// Local store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path; `None` uses the platform default location.
    pub path: Option<PathBuf>,
}

/// Remote history service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the history service.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Retention and coverage tuning, fixed at initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// How far back the local store holds data, in hours.
    pub window_hours: i64,
    /// Slack subtracted from the retention boundary, in seconds.
    pub safety_margin_secs: i64,
    /// Coverage ratio above which the preloader skips a series.
    pub warm_coverage_ratio: f64,
    /// Coverage ratio above which the resolver skips the remote call.
    pub query_coverage_ratio: f64,
    /// Maximum age of the freshest sample before the cache counts as stale.
    pub max_cache_age_minutes: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            safety_margin_secs: default_safety_margin_secs(),
            warm_coverage_ratio: default_warm_coverage_ratio(),
            query_coverage_ratio: default_query_coverage_ratio(),
            max_cache_age_minutes: default_max_cache_age_minutes(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_window_hours() -> i64 {
    48
}

fn default_safety_margin_secs() -> i64 {
    300
}

fn default_warm_coverage_ratio() -> f64 {
    0.85
}

fn default_query_coverage_ratio() -> f64 {
    0.90
}

fn default_max_cache_age_minutes() -> i64 {
    15
}

impl CacheConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The retention policy these settings describe.
    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention_window_ms: self.retention.window_hours * 60 * 60 * 1000,
            safety_margin_ms: self.retention.safety_margin_secs * 1000,
            cache_valid_coverage_ratio: self.retention.warm_coverage_ratio,
            query_backfill_coverage_ratio: self.retention.query_coverage_ratio,
            max_cache_age_ms: self.retention.max_cache_age_minutes * 60 * 1000,
        }
    }
}
