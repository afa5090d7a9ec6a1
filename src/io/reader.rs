//! The input collaborator: a lazy, restartable sequence of rows.

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;

use crate::error::PipelineError;
use crate::table::Row;

/// A lazy iterator over rows. End of input is the iterator ending, not an
/// error.
pub type RowIter = Box<dyn Iterator<Item = Result<Row, PipelineError>> + Send>;

/// A finite, restartable-from-start row producer.
///
/// Each call to [`RowSource::rows`] starts a fresh pass over the same
/// input from the first row.
pub trait RowSource: Send + Sync {
    fn rows(&self) -> Result<RowIter, PipelineError>;
}

/// Reads comma-delimited rows from a file.
///
/// Records are treated as headerless and may vary in width; CSV decoding
/// itself (quoting, embedded delimiters) is the `csv` crate's concern.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSource for CsvSource {
    fn rows(&self) -> Result<RowIter, PipelineError> {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let iter = reader
            .into_records()
            .map(|record| -> Result<Row, PipelineError> {
                let record = record?;
                Ok(record.iter().map(str::to_string).collect())
            });
        Ok(Box::new(iter))
    }
}

/// In-memory source for tests and programmatic use.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<Row>,
}

impl MemorySource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

impl RowSource for MemorySource {
    fn rows(&self) -> Result<RowIter, PipelineError> {
        Ok(Box::new(
            self.rows.clone().into_iter().map(Ok::<Row, PipelineError>),
        ))
    }
}
