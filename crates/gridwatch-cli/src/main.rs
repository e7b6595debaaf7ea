//! Operational CLI for the gridwatch sample cache.
//!
//! Troubleshooting surface over [`HistoryCache`]: inspect statistics, run
//! the age sweep, clear the cache, resolve a range query, or warm a
//! device's series by hand.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

use gridwatch_cache::{CacheConfig, HistoryCache, ProgressCallback};
use gridwatch_types::{QueryRange, RangePreset, SourceTag};

#[derive(Parser)]
#[command(name = "gridwatch")]
#[command(author, version, about = "Operational CLI for the gridwatch sample cache", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the cache database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Override the remote history service URL
    #[arg(long, global = true)]
    remote_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cache statistics
    Stats {
        /// Also show the sample count for these devices
        #[arg(short, long)]
        device: Vec<String>,
    },

    /// Evict samples older than the retention window
    Evict,

    /// Delete every cached sample
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Resolve a range query and summarize the result
    Query {
        /// Device (feeder) ID
        device: String,

        /// Series (recorder) ID
        series: String,

        /// Preset span ending now (1h, 2h, 6h, 12h, 24h, 48h, 7d)
        #[arg(long, conflicts_with_all = ["from", "to"])]
        last: Option<String>,

        /// Range start (RFC 3339)
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Range end (RFC 3339)
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Serve from the local store only, no remote call
        #[arg(long)]
        local_only: bool,
    },

    /// Warm the retention window for a device's series
    Preload {
        /// Device (feeder) ID
        device: String,

        /// Series (recorder) IDs to warm
        #[arg(required = true)]
        series: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => CacheConfig::load(path)?,
        None => CacheConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.store.path = Some(db.clone());
    }
    if let Some(url) = &cli.remote_url {
        config.remote.base_url = url.clone();
    }

    tracing::debug!("Using remote history service at {}", config.remote.base_url);
    let cache = HistoryCache::open(&config)?;

    match cli.command {
        Commands::Stats { device } => {
            let stats = cache.stats()?;
            println!("total samples: {}", stats.total_samples);
            for device_id in device {
                let count = cache.store().count_for_device(&device_id)?;
                println!("  {device_id}: {count}");
            }
        }

        Commands::Evict => {
            let evicted = cache.evict_expired()?;
            println!("evicted {evicted} expired samples");
        }

        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to clear the cache without --yes");
            }
            cache.clear_all()?;
            println!("cache cleared");
        }

        Commands::Query {
            device,
            series,
            last,
            from,
            to,
            local_only,
        } => {
            let range = build_range(device, series, last, from, to)?;
            let resolved = cache.resolve(&range, local_only).await;

            if resolved.source == SourceTag::Error {
                let error = resolved
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                bail!("query failed: {error}");
            }

            println!(
                "{} samples (source: {})",
                resolved.samples.len(),
                resolved.source
            );
            if let (Some(first), Some(last)) = (resolved.samples.first(), resolved.samples.last())
            {
                println!("  first: {}", format_ts(first.timestamp));
                println!("  last:  {}", format_ts(last.timestamp));
            }
        }

        Commands::Preload { device, series } => {
            let on_progress: ProgressCallback = Arc::new(|percent| {
                println!("preload: {percent}%");
            });
            let outcome = cache
                .preloader()
                .preload(&device, &series, Some(on_progress))
                .await;

            if !outcome.failed_series.is_empty() {
                println!("failed series: {}", outcome.failed_series.join(", "));
            }
            println!(
                "preload {}{}",
                if outcome.success { "finished" } else { "cancelled" },
                if outcome.fetched_anything {
                    ""
                } else {
                    " (cache was already warm)"
                }
            );
        }
    }

    Ok(())
}

fn build_range(
    device: String,
    series: String,
    last: Option<String>,
    from: Option<String>,
    to: Option<String>,
) -> Result<QueryRange> {
    let (from_ms, to_ms) = match (last, from, to) {
        (Some(preset), None, None) => {
            let preset = RangePreset::parse(&preset)
                .ok_or_else(|| anyhow!("unknown range preset: {preset}"))?;
            let now = now_ms();
            (now - preset.span_ms(), now)
        }
        (None, Some(from), Some(to)) => (parse_ts(&from)?, parse_ts(&to)?),
        _ => bail!("specify either --last or both --from and --to"),
    };

    Ok(QueryRange::new(device, series, from_ms, to_ms)?)
}

fn parse_ts(s: &str) -> Result<i64> {
    let parsed = OffsetDateTime::parse(s, &Rfc3339)
        .with_context(|| format!("invalid RFC 3339 timestamp: {s}"))?;
    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn format_ts(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
