//! Chunked concurrent execution of a processing chain.
//!
//! The scheduler slices the input into fixed-size chunks, fans them out to
//! a bounded pool of blocking workers, and reassembles the results in
//! input order so the output is byte-identical to a sequential run. The
//! [`run_sequential`] path processes one row at a time and exists both as
//! a reference semantics and as a low-overhead mode for small inputs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, StreamExt};
use tracing::{debug, info};

use super::chunk_processor::{ChunkOutput, ChunkProcessor};
use super::merger::Merger;
use crate::error::PipelineError;
use crate::io::{RowSink, RowSource};
use crate::ops::{AggregateState, Chain};
use crate::pipeline::Metrics;
use crate::table::{Chunk, Row};

/// Tuning knobs for the concurrent execution path.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Rows per chunk.
    pub chunk_size: usize,

    /// Maximum chunks in flight at once.
    pub concurrency: usize,

    /// When set, completed chunks spill to per-chunk files under this
    /// directory instead of being buffered in memory until emittable.
    pub spill_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            concurrency: 16,
            spill_dir: None,
        }
    }
}

/// Counters describing one completed run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub total_chunks: u64,
    pub rows_read: u64,
    pub rows_emitted: u64,
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} chunks, {} rows read, {} rows emitted",
            self.total_chunks, self.rows_read, self.rows_emitted
        )
    }
}

/// Fans chunks out to blocking workers and reassembles their output.
pub struct Scheduler {
    processor: Arc<ChunkProcessor>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        processor: Arc<ChunkProcessor>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            processor,
            metrics,
            config,
        }
    }

    /// Process everything `source` yields and write the result to `sink`.
    ///
    /// Row-only chains stream: each chunk's surviving rows go to the sink
    /// as soon as the chunk reaches the in-order frontier. Chains ending
    /// in an aggregation instead collect one partial state per chunk,
    /// fold the partials in ascending sequence order, and emit the
    /// finalized summary rows at the end.
    pub async fn run(
        &self,
        source: &dyn RowSource,
        sink: &mut dyn RowSink,
    ) -> Result<SchedulerStats, PipelineError> {
        let aggregated = self.processor.chain().has_aggregates();

        let open_start = Instant::now();
        let rows = source.rows()?;
        self.metrics.add_read_time(open_start.elapsed());

        let chunks = ChunkIter::new(rows, self.config.chunk_size, Arc::clone(&self.metrics));

        let processor = Arc::clone(&self.processor);
        let mut completed = stream::iter(chunks)
            .map(move |next| {
                let processor = Arc::clone(&processor);
                async move {
                    let chunk = next?;
                    let seq = chunk.seq;
                    tokio::task::spawn_blocking(move || processor.process(chunk))
                        .await
                        .map_err(|err| PipelineError::Worker {
                            seq,
                            message: err.to_string(),
                        })?
                }
            })
            .buffer_unordered(self.config.concurrency.max(1));

        // Aggregated chains use a fixed-size partial per chunk, so there
        // is nothing worth spilling to disk.
        let mut merger = match (&self.config.spill_dir, aggregated) {
            (Some(dir), false) => Merger::spill(dir)?,
            _ => Merger::in_memory(),
        };
        let mut partials: BTreeMap<u64, Vec<AggregateState>> = BTreeMap::new();
        let mut stats = SchedulerStats::default();

        while let Some(result) = completed.next().await {
            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    self.metrics.add_failure();
                    // Dropping the stream cancels dispatch of any chunk
                    // not yet handed to a worker.
                    return Err(err);
                }
            };
            stats.total_chunks += 1;
            if aggregated {
                self.stash_partials(&mut partials, output)?;
            } else {
                let write_start = Instant::now();
                let emitted = merger.push(output.seq, output.rows, sink)?;
                self.metrics.add_write_time(write_start.elapsed());
                self.metrics.add_rows_emitted(emitted);
                stats.rows_emitted += emitted;
            }
        }
        drop(completed);

        if aggregated {
            let emitted = self.finalize_aggregates(partials, stats.total_chunks, sink)?;
            self.metrics.add_rows_emitted(emitted);
            stats.rows_emitted += emitted;
        } else {
            let write_start = Instant::now();
            let emitted = merger.finish(sink)?;
            self.metrics.add_write_time(write_start.elapsed());
            self.metrics.add_rows_emitted(emitted);
            stats.rows_emitted += emitted;
        }

        stats.rows_read = self.metrics.snapshot().rows_read;
        info!(
            chunks = stats.total_chunks,
            rows_read = stats.rows_read,
            rows_emitted = stats.rows_emitted,
            "pipeline run complete"
        );
        Ok(stats)
    }

    fn stash_partials(
        &self,
        partials: &mut BTreeMap<u64, Vec<AggregateState>>,
        output: ChunkOutput,
    ) -> Result<(), PipelineError> {
        if partials.insert(output.seq, output.partials).is_some() {
            return Err(PipelineError::merge(format!(
                "duplicate chunk sequence number {}",
                output.seq
            )));
        }
        Ok(())
    }

    /// Fold per-chunk partial states in ascending sequence order, then
    /// finalize once and write the summary rows.
    fn finalize_aggregates(
        &self,
        partials: BTreeMap<u64, Vec<AggregateState>>,
        total_chunks: u64,
        sink: &mut dyn RowSink,
    ) -> Result<u64, PipelineError> {
        let mut combined: Option<Vec<AggregateState>> = None;
        for (expected, (seq, chunk_partials)) in partials.into_iter().enumerate() {
            if seq != expected as u64 {
                return Err(PipelineError::merge(format!(
                    "chunk sequence gap: expected chunk {expected}, found {seq}"
                )));
            }
            combined = Some(match combined {
                None => chunk_partials,
                Some(acc) => {
                    if acc.len() != chunk_partials.len() {
                        return Err(PipelineError::merge(format!(
                            "partial state count mismatch at chunk {seq}"
                        )));
                    }
                    acc.into_iter()
                        .zip(chunk_partials)
                        .map(|(left, right)| left.merge(right))
                        .collect::<Result<Vec<_>, _>>()?
                }
            });
        }
        debug!(chunks = total_chunks, "folded aggregate partials");

        // Empty input still finalizes: a ColumnAverage over zero rows
        // produces no rows, a TopN produces an empty candidate list.
        let states = match combined {
            Some(states) => states,
            None => self.processor.chain().new_states(),
        };

        let write_start = Instant::now();
        let mut emitted = 0;
        for state in states {
            for row in state.finalize() {
                if row.is_empty() {
                    continue;
                }
                sink.write_row(&row)?;
                emitted += 1;
            }
        }
        self.metrics.add_write_time(write_start.elapsed());
        Ok(emitted)
    }
}

/// Single-threaded reference path: one row at a time, no chunking.
pub fn run_sequential(
    chain: &Chain,
    source: &dyn RowSource,
    sink: &mut dyn RowSink,
) -> Result<SchedulerStats, PipelineError> {
    let mut states = chain.new_states();
    let aggregated = chain.has_aggregates();
    let mut stats = SchedulerStats::default();

    for (row_index, next) in source.rows()?.enumerate() {
        let row = next?;
        stats.rows_read += 1;
        let Some(row) = chain.apply_row(row, row_index)? else {
            continue;
        };
        if row.is_empty() {
            continue;
        }
        for state in &mut states {
            state.observe(&row, row_index)?;
        }
        if !aggregated {
            sink.write_row(&row)?;
            stats.rows_emitted += 1;
        }
    }

    if aggregated {
        for state in states {
            for row in state.finalize() {
                if row.is_empty() {
                    continue;
                }
                sink.write_row(&row)?;
                stats.rows_emitted += 1;
            }
        }
    }
    debug!(
        rows_read = stats.rows_read,
        rows_emitted = stats.rows_emitted,
        "sequential run complete"
    );
    Ok(stats)
}

/// Lazily slices a row iterator into fixed-size chunks tagged with a
/// sequence number and the global offset of their first row.
struct ChunkIter {
    rows: crate::io::RowIter,
    chunk_size: usize,
    next_seq: u64,
    offset: usize,
    metrics: Arc<Metrics>,
    done: bool,
}

impl ChunkIter {
    fn new(rows: crate::io::RowIter, chunk_size: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            rows,
            chunk_size: chunk_size.max(1),
            next_seq: 0,
            offset: 0,
            metrics,
            done: false,
        }
    }
}

impl Iterator for ChunkIter {
    type Item = Result<Chunk, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut rows: Vec<Row> = Vec::with_capacity(self.chunk_size);
        while rows.len() < self.chunk_size {
            match self.rows.next() {
                Some(Ok(row)) => rows.push(row),
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if rows.is_empty() {
            return None;
        }
        self.metrics.add_rows_read(rows.len() as u64);
        let chunk = Chunk::new(self.next_seq, self.offset, rows);
        self.next_seq += 1;
        self.offset += chunk.len();
        Some(Ok(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySink, MemorySource};
    use crate::ops::RowOp;
    use crate::table::row;

    fn rows_source(n: usize) -> MemorySource {
        MemorySource::new((0..n).map(|i| row([i.to_string()])).collect())
    }

    #[test]
    fn test_chunk_iter_slices_with_offsets() {
        let source = rows_source(5);
        let iter = ChunkIter::new(source.rows().unwrap(), 2, Metrics::new());
        let chunks: Vec<Chunk> = iter.map(|c| c.unwrap()).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].seq, chunks[0].offset, chunks[0].len()), (0, 0, 2));
        assert_eq!((chunks[1].seq, chunks[1].offset, chunks[1].len()), (1, 2, 2));
        assert_eq!((chunks[2].seq, chunks[2].offset, chunks[2].len()), (2, 4, 1));
    }

    #[test]
    fn test_chunk_iter_empty_input() {
        let source = rows_source(0);
        let mut iter = ChunkIter::new(source.rows().unwrap(), 4, Metrics::new());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_run_sequential_streams_rows() {
        let chain = Chain::builder()
            .with(RowOp::RowRange { start: 1, end: 3 })
            .build()
            .unwrap();
        let source = rows_source(5);
        let mut sink = MemorySink::new();

        let stats = run_sequential(&chain, &source, &mut sink).unwrap();

        assert_eq!(stats.rows_read, 5);
        assert_eq!(stats.rows_emitted, 2);
        assert_eq!(sink.rows(), &[row(["1"]), row(["2"])]);
    }

    #[tokio::test]
    async fn test_run_matches_sequential_output() {
        let chain = Arc::new(
            Chain::builder()
                .with(RowOp::RowRange { start: 1, end: 9 })
                .build()
                .unwrap(),
        );
        let source = rows_source(10);

        let mut expected = MemorySink::new();
        run_sequential(&chain, &source, &mut expected).unwrap();

        let metrics = Metrics::new();
        let scheduler = Scheduler::new(
            Arc::new(ChunkProcessor::new(Arc::clone(&chain), Arc::clone(&metrics))),
            metrics,
            SchedulerConfig {
                chunk_size: 3,
                concurrency: 4,
                spill_dir: None,
            },
        );
        let mut actual = MemorySink::new();
        let stats = scheduler.run(&source, &mut actual).await.unwrap();

        assert_eq!(stats.total_chunks, 4);
        assert_eq!(actual.rows(), expected.rows());
    }
}
