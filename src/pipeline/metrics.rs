//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one pipeline run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total shard bytes read from storage
    pub bytes_read: AtomicU64,

    /// Shards fetched, parsed and transformed
    pub shards_fetched: AtomicU64,

    /// Shards whose fetch, parse or transform failed
    pub shards_failed: AtomicU64,

    /// Rows parsed across all shards
    pub rows_parsed: AtomicU64,

    /// Fetch attempts that were retried
    pub fetch_retries: AtomicU64,

    /// Shards deleted during cleanup
    pub shards_deleted: AtomicU64,

    /// Deletes that failed during cleanup
    pub delete_failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage timing (in microseconds for precision)
    /// Time spent fetching shard bodies (microseconds)
    pub fetch_us: AtomicU64,

    /// Time spent parsing shard bodies (microseconds)
    pub parse_us: AtomicU64,

    /// Time spent in transforms (microseconds)
    pub transform_us: AtomicU64,

    /// Time spent deleting shards (microseconds)
    pub delete_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record bytes read.
    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a completed shard.
    pub fn add_shard_fetched(&self) {
        self.shards_fetched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed shard.
    pub fn add_shard_failed(&self) {
        self.shards_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rows parsed.
    pub fn add_rows_parsed(&self, rows: u64) {
        self.rows_parsed.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record a retried fetch.
    pub fn add_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a deleted shard.
    pub fn add_shard_deleted(&self) {
        self.shards_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed delete.
    pub fn add_delete_failure(&self) {
        self.delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fetch_time(&self, duration: Duration) {
        self.fetch_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_parse_time(&self, duration: Duration) {
        self.parse_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_transform_time(&self, duration: Duration) {
        self.transform_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_delete_time(&self, duration: Duration) {
        self.delete_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get read throughput in MB/s.
    pub fn read_throughput_mbps(&self) -> f64 {
        let bytes = self.bytes_read.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (bytes as f64) / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        }
    }

    /// Get shards per second.
    pub fn shards_per_second(&self) -> f64 {
        let shards = self.shards_fetched.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            shards as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            shards_fetched: self.shards_fetched.load(Ordering::Relaxed),
            shards_failed: self.shards_failed.load(Ordering::Relaxed),
            rows_parsed: self.rows_parsed.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            shards_deleted: self.shards_deleted.load(Ordering::Relaxed),
            delete_failures: self.delete_failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            read_throughput_mbps: self.read_throughput_mbps(),
            shards_per_second: self.shards_per_second(),
            fetch_secs: self.fetch_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            parse_secs: self.parse_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            transform_secs: self.transform_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            delete_secs: self.delete_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub bytes_read: u64,
    pub shards_fetched: u64,
    pub shards_failed: u64,
    pub rows_parsed: u64,
    pub fetch_retries: u64,
    pub shards_deleted: u64,
    pub delete_failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub read_throughput_mbps: f64,
    pub shards_per_second: f64,
    /// Total time spent fetching (seconds, summed across workers)
    pub fetch_secs: f64,
    /// Total time spent parsing (seconds, summed across workers)
    pub parse_secs: f64,
    /// Total time spent transforming (seconds, summed across workers)
    pub transform_secs: f64,
    /// Total time spent deleting (seconds, summed across workers)
    pub delete_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_stage_time = self.fetch_secs + self.parse_secs + self.transform_secs + self.delete_secs;
        let (fetch_pct, parse_pct, transform_pct, delete_pct) = if total_stage_time > 0.0 {
            (
                self.fetch_secs / total_stage_time * 100.0,
                self.parse_secs / total_stage_time * 100.0,
                self.transform_secs / total_stage_time * 100.0,
                self.delete_secs / total_stage_time * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Shards: {} fetched, {} failed, {} deleted | Rows: {} | \
             Read: {:.2} MB @ {:.2} MB/s | Rate: {:.1} shards/s | \
             Retries: {} | Delete failures: {} | Elapsed: {:.1}s | \
             Time: fetch {:.0}% | parse {:.0}% | transform {:.0}% | delete {:.0}%",
            self.shards_fetched,
            self.shards_failed,
            self.shards_deleted,
            self.rows_parsed,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.read_throughput_mbps,
            self.shards_per_second,
            self.fetch_retries,
            self.delete_failures,
            self.elapsed.as_secs_f64(),
            fetch_pct,
            parse_pct,
            transform_pct,
            delete_pct,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_shards: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_shards: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_shards,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_shards > 0 {
                        (snapshot.shards_fetched + snapshot.shards_failed) as f64
                            / self.total_shards as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }
}
