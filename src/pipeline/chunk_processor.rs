//! Per-chunk execution of the processing chain.
//!
//! Each worker drives the full filter/transform portion of the chain over
//! its chunk alone, using the chunk's offset so row-range filters see
//! global row indices. Aggregates accumulate into per-chunk partial states
//! that the orchestrator later combines; the chunk's own rows are not kept
//! in aggregated mode.

use std::sync::Arc;
use std::time::Instant;

use crate::error::PipelineError;
use crate::ops::{AggregateState, Chain};
use crate::pipeline::Metrics;
use crate::table::{Chunk, Row};

/// Processor for individual chunks. Shared (immutably) across workers.
pub struct ChunkProcessor {
    chain: Arc<Chain>,
    metrics: Arc<Metrics>,
}

/// Result of running the chain over one chunk.
#[derive(Debug)]
pub struct ChunkOutput {
    /// Sequence number carried over from the input chunk.
    pub seq: u64,

    /// Surviving rows in input order. Empty in aggregated mode.
    pub rows: Vec<Row>,

    /// Partial aggregate states, aligned with the chain's aggregate ops.
    pub partials: Vec<AggregateState>,
}

impl ChunkProcessor {
    /// Create a new chunk processor.
    pub fn new(chain: Arc<Chain>, metrics: Arc<Metrics>) -> Self {
        Self { chain, metrics }
    }

    /// The chain being run.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Process a single chunk.
    pub fn process(&self, chunk: Chunk) -> Result<ChunkOutput, PipelineError> {
        let start = Instant::now();
        let seq = chunk.seq;
        let offset = chunk.offset;
        let total = chunk.len() as u64;
        let aggregated = self.chain.has_aggregates();

        let mut partials = self.chain.new_states();
        let mut rows = Vec::new();

        for (i, row) in chunk.rows.into_iter().enumerate() {
            let row_index = offset + i;
            let Some(row) = self.chain.apply_row(row, row_index)? else {
                continue;
            };
            // An emptied row (e.g. an out-of-bounds column range) is
            // dropped rather than emitted or aggregated.
            if row.is_empty() {
                continue;
            }
            for state in &mut partials {
                state.observe(&row, row_index)?;
            }
            if !aggregated {
                rows.push(row);
            }
        }

        let kept = if aggregated { 0 } else { rows.len() as u64 };
        if !aggregated {
            self.metrics.add_rows_dropped(total - kept);
        }
        self.metrics.add_process_time(start.elapsed());
        self.metrics.add_chunk_processed();

        tracing::trace!(
            "Chunk {} (offset {}): {} rows in, {} rows out",
            seq,
            offset,
            total,
            kept
        );

        Ok(ChunkOutput {
            seq,
            rows,
            partials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{AggregateOp, CoercionPolicy, Comparator, RowOp};
    use crate::table::row;

    fn processor(chain: Chain) -> ChunkProcessor {
        ChunkProcessor::new(Arc::new(chain), Metrics::new())
    }

    #[test]
    fn test_process_uses_global_row_indices() {
        // Rows 0..5 pass the filter; this chunk holds rows 3..7.
        let chain = Chain::builder()
            .with(RowOp::RowRange { start: 0, end: 5 })
            .build()
            .unwrap();
        let p = processor(chain);

        let chunk = Chunk::new(
            1,
            3,
            vec![row(["3"]), row(["4"]), row(["5"]), row(["6"])],
        );
        let out = p.process(chunk).unwrap();
        assert_eq!(out.rows, vec![row(["3"]), row(["4"])]);
        assert_eq!(out.seq, 1);
    }

    #[test]
    fn test_aggregated_mode_suppresses_rows() {
        let chain = Chain::builder()
            .with(AggregateOp::TopN {
                n: 2,
                column: 0,
                comparator: Comparator::default(),
            })
            .build()
            .unwrap();
        let p = processor(chain);

        let out = p
            .process(Chunk::new(0, 0, vec![row(["5"]), row(["9"])]))
            .unwrap();
        assert!(out.rows.is_empty());
        assert_eq!(out.partials.len(), 1);
        let table = out.partials.into_iter().next().unwrap().finalize();
        assert_eq!(table, vec![row(["9"]), row(["5"])]);
    }

    #[test]
    fn test_emptied_rows_are_dropped() {
        let chain = Chain::builder()
            .with(RowOp::ColumnRange { start: 5, end: 9 })
            .build()
            .unwrap();
        let p = processor(chain);

        let out = p
            .process(Chunk::new(0, 0, vec![row(["a", "b"])]))
            .unwrap();
        assert!(out.rows.is_empty());
    }

    #[test]
    fn test_fatal_error_carries_row_index() {
        let chain = Chain::builder()
            .with(RowOp::SumColumns {
                columns: None,
                policy: CoercionPolicy::AbortPipeline,
            })
            .build()
            .unwrap();
        let p = processor(chain);

        let chunk = Chunk::new(2, 200, vec![row(["1"]), row(["bad"])]);
        match p.process(chunk) {
            Err(PipelineError::Coercion { row, .. }) => assert_eq!(row, 201),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
