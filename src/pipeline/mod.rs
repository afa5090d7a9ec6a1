//! Concurrent pipeline execution: chunking, workers, ordered merge,
//! and runtime metrics.

pub mod chunk_processor;
pub mod merger;
pub mod metrics;
pub mod scheduler;

pub use chunk_processor::{ChunkOutput, ChunkProcessor};
pub use merger::{Merger, OrderedMerger, SpillMerger};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use scheduler::{run_sequential, Scheduler, SchedulerConfig, SchedulerStats};
