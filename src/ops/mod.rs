//! Row operations, aggregates, and the processing chain.

mod aggregate;
mod chain;
mod row;

pub use aggregate::{AggregateOp, AggregateState, Comparator};
pub use chain::{Chain, ChainBuilder, Op};
pub use row::{CellFn, CoercionPolicy, RowOp};
