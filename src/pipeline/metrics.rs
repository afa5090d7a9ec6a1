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

/// Metrics for a pipeline run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Rows read from the input source
    pub rows_read: AtomicU64,

    /// Rows written to the output sink
    pub rows_emitted: AtomicU64,

    /// Rows dropped by filters or abort-row policies
    pub rows_dropped: AtomicU64,

    /// Number of chunks processed
    pub chunks_processed: AtomicU64,

    /// Number of failed operations
    pub failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage timing (in microseconds for precision)
    /// Time spent reading input rows (microseconds)
    pub read_us: AtomicU64,

    /// Time spent running the chain over chunks (microseconds)
    pub process_us: AtomicU64,

    /// Time spent writing output rows (microseconds)
    pub write_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record rows read from the source.
    pub fn add_rows_read(&self, count: u64) {
        self.rows_read.fetch_add(count, Ordering::Relaxed);
    }

    /// Record rows written to the sink.
    pub fn add_rows_emitted(&self, count: u64) {
        self.rows_emitted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record rows dropped by a filter or abort-row policy.
    pub fn add_rows_dropped(&self, count: u64) {
        self.rows_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a processed chunk.
    pub fn add_chunk_processed(&self) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure.
    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent reading input (in microseconds).
    pub fn add_read_time(&self, duration: Duration) {
        self.read_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent running the chain (in microseconds).
    pub fn add_process_time(&self, duration: Duration) {
        self.process_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent writing output (in microseconds).
    pub fn add_write_time(&self, duration: Duration) {
        self.write_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get rows processed per second.
    pub fn rows_per_second(&self) -> f64 {
        let rows = self.rows_read.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            rows as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            rows_per_second: self.rows_per_second(),
            read_secs: self.read_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            process_secs: self.process_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub rows_read: u64,
    pub rows_emitted: u64,
    pub rows_dropped: u64,
    pub chunks_processed: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub rows_per_second: f64,
    /// Total time spent reading input (seconds, summed across tasks)
    pub read_secs: f64,
    /// Total time spent running the chain (seconds, summed across tasks)
    pub process_secs: f64,
    /// Total time spent writing output (seconds, summed across tasks)
    pub write_secs: f64,
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
        let total_stage_time = self.read_secs + self.process_secs + self.write_secs;
        let (read_pct, process_pct, write_pct) = if total_stage_time > 0.0 {
            (
                self.read_secs / total_stage_time * 100.0,
                self.process_secs / total_stage_time * 100.0,
                self.write_secs / total_stage_time * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Rows: {} read, {} emitted, {} dropped | Chunks: {} | \
             Rate: {:.0} rows/s | Failures: {} | Elapsed: {:.1}s | \
             Time: read {:.0}% | process {:.0}% | write {:.0}%",
            self.rows_read,
            self.rows_emitted,
            self.rows_dropped,
            self.chunks_processed,
            self.rows_per_second,
            self.failures,
            self.elapsed.as_secs_f64(),
            read_pct,
            process_pct,
            write_pct,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("{}", self.metrics.snapshot());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }

}
