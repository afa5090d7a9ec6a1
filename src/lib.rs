//! Tablemill
//!
//! Composable CSV processing pipeline: chains of row filters, transforms,
//! and aggregations executed over fixed-size chunks on a bounded worker
//! pool, with output guaranteed byte-identical to a sequential run.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Ops**: Row operations and two-phase aggregations, composed into a
//!   validated [`Chain`]
//! - **I/O**: Streaming CSV sources and atomically-persisted CSV sinks
//! - **Pipeline**: Chunked concurrent execution, ordered merge, metrics
//!
//! # Usage
//!
//! ```no_run
//! use tablemill::{Config, run_pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_pipeline(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod ops;
pub mod pipeline;
pub mod table;

pub use config::Config;
pub use error::PipelineError;
pub use io::{CsvSink, CsvSource, RowSink, RowSource};
pub use ops::{AggregateOp, CellFn, Chain, CoercionPolicy, Comparator, RowOp};
pub use pipeline::{ChunkProcessor, Metrics, Scheduler, SchedulerConfig};
pub use table::{Chunk, Row, Table};

use anyhow::Result;
use std::sync::Arc;

use pipeline::{MetricsReporter, SchedulerStats};

/// Run the full pipeline with the given configuration.
pub async fn run_pipeline(config: Config) -> Result<SchedulerStats> {
    config.validate()?;
    let chain = Arc::new(config.build_chain()?);

    tracing::info!(
        input = %config.input.path.display(),
        output = %config.output.path.display(),
        ops = chain.len(),
        "Starting pipeline"
    );

    let source = CsvSource::new(&config.input.path);
    let mut sink = CsvSink::create(&config.output.path)?;
    let metrics = Metrics::new();

    let stats = if config.processing.sequential {
        pipeline::run_sequential(&chain, &source, &mut sink)?
    } else {
        // The reporter runs until the pipeline drops the shutdown sender.
        let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
        let reporter_handle = if config.processing.enable_metrics {
            let reporter =
                MetricsReporter::new(metrics.clone(), config.processing.metrics_interval_secs);
            Some(tokio::spawn(async move { reporter.run(shutdown_rx).await }))
        } else {
            None
        };

        let scheduler_config = SchedulerConfig {
            chunk_size: config.processing.chunk_size,
            concurrency: config.processing.concurrency,
            spill_dir: config.processing.spill_dir.clone(),
        };
        let processor = Arc::new(ChunkProcessor::new(chain, metrics.clone()));
        let scheduler = Scheduler::new(processor, metrics.clone(), scheduler_config);

        let result = scheduler.run(&source, &mut sink).await;

        drop(shutdown_tx);
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }
        result?
    };

    sink.finish()?;

    if let Some(path) = &config.processing.metrics_output_path {
        metrics.snapshot().save_to_file(path)?;
    }

    tracing::info!("Pipeline complete: {}", stats);
    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
