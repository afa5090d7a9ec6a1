//! Row-oriented input and output collaborators.

mod reader;
mod writer;

pub use reader::{CsvSource, MemorySource, RowIter, RowSource};
pub use writer::{CsvSink, MemorySink, RowSink};
