//! The processing chain: an ordered sequence of operations applied to each
//! row, short-circuiting when a filter drops the row.

use crate::error::PipelineError;
use crate::ops::aggregate::{AggregateOp, AggregateState};
use crate::ops::row::RowOp;
use crate::table::Row;

/// A single chain entry: either a per-row operation or an aggregate.
#[derive(Debug, Clone)]
pub enum Op {
    Row(RowOp),
    Aggregate(AggregateOp),
}

impl From<RowOp> for Op {
    fn from(op: RowOp) -> Self {
        Op::Row(op)
    }
}

impl From<AggregateOp> for Op {
    fn from(op: AggregateOp) -> Self {
        Op::Aggregate(op)
    }
}

/// Fluent builder for a [`Chain`].
#[derive(Debug, Default)]
pub struct ChainBuilder {
    ops: Vec<Op>,
}

impl ChainBuilder {
    /// Append an operation.
    pub fn with(mut self, op: impl Into<Op>) -> Self {
        self.ops.push(op.into());
        self
    }

    /// Validate and freeze the chain.
    ///
    /// Aggregates must occupy the tail positions: an aggregate's output is
    /// no longer a 1:1 row mapping, so a filter or transform after one is a
    /// configuration error.
    pub fn build(self) -> Result<Chain, PipelineError> {
        let mut row_ops = Vec::new();
        let mut aggregates = Vec::new();

        for op in self.ops {
            match op {
                Op::Row(op) => {
                    if !aggregates.is_empty() {
                        return Err(PipelineError::config(format!(
                            "operation {} may not follow an aggregate; aggregates must be last",
                            op.name()
                        )));
                    }
                    op.validate()?;
                    row_ops.push(op);
                }
                Op::Aggregate(op) => {
                    op.validate()?;
                    aggregates.push(op);
                }
            }
        }

        Ok(Chain {
            row_ops,
            aggregates,
        })
    }
}

/// An ordered, validated sequence of operations. Constructed once and
/// driven across the whole input.
#[derive(Debug, Clone)]
pub struct Chain {
    row_ops: Vec<RowOp>,
    aggregates: Vec<AggregateOp>,
}

impl Chain {
    /// Start building a chain.
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// The filter/transform portion of the chain, in order.
    pub fn row_ops(&self) -> &[RowOp] {
        &self.row_ops
    }

    /// The aggregate tail of the chain, in order.
    pub fn aggregates(&self) -> &[AggregateOp] {
        &self.aggregates
    }

    /// Whether the run must use aggregated (whole-table) mode.
    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.row_ops.len() + self.aggregates.len()
    }

    /// Whether the chain holds no operations.
    pub fn is_empty(&self) -> bool {
        self.row_ops.is_empty() && self.aggregates.is_empty()
    }

    /// Run the filter/transform portion against one row.
    ///
    /// `row_index` is the row's global index in the source, so row-range
    /// filters work inside chunks that do not start at row 0. The first
    /// operation that drops the row short-circuits the rest.
    pub fn apply_row(&self, row: Row, row_index: usize) -> Result<Option<Row>, PipelineError> {
        let mut current = row;
        for op in &self.row_ops {
            match op.apply(current, row_index)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Fresh per-chunk aggregate states, aligned with [`Chain::aggregates`].
    pub fn new_states(&self) -> Vec<AggregateState> {
        self.aggregates.iter().map(AggregateOp::new_state).collect()
    }
}
