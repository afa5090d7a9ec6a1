//! The output collaborator: rows accepted in emission order, flushed on
//! completion.
//!
//! The CSV sink writes to a temporary file in the destination directory
//! and atomically replaces the destination on `finish()`. A failed or
//! cancelled run never promotes partial output; the temporary file is
//! cleaned up on drop.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use tempfile::NamedTempFile;

use crate::error::PipelineError;
use crate::table::Row;

/// A row consumer. `finish` must be called exactly once after the last
/// row; for the CSV sink that is what makes the output visible.
pub trait RowSink: Send {
    fn write_row(&mut self, row: &Row) -> Result<(), PipelineError>;
    fn finish(&mut self) -> Result<(), PipelineError>;
}

/// Writes comma-delimited rows to a file, atomically.
pub struct CsvSink {
    writer: Option<csv::Writer<BufWriter<NamedTempFile>>>,
    dest: PathBuf,
}

impl CsvSink {
    /// Create a sink targeting `dest`. The temporary file lives in the
    /// same directory so the final rename stays on one filesystem.
    pub fn create(dest: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let dest = dest.as_ref().to_path_buf();
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            Some(_) => Path::new("."),
            None => {
                return Err(PipelineError::config(format!(
                    "cannot determine parent directory for output {}",
                    dest.display()
                )))
            }
        };
        let temp = NamedTempFile::new_in(parent)?;
        let writer = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(BufWriter::new(temp));
        Ok(Self {
            writer: Some(writer),
            dest,
        })
    }

    /// The destination path.
    pub fn dest(&self) -> &Path {
        &self.dest
    }
}

impl RowSink for CsvSink {
    fn write_row(&mut self, row: &Row) -> Result<(), PipelineError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::config("write after finish on CSV sink"))?;
        writer.write_record(row)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| PipelineError::config("CSV sink finished twice"))?;

        let buf = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let temp = buf
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        temp.persist(&self.dest).map_err(|e| e.error)?;
        Ok(())
    }
}

/// In-memory sink for tests and programmatic use.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<Row>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows written so far, in emission order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consume the sink, returning the written rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl RowSink for MemorySink {
    fn write_row(&mut self, row: &Row) -> Result<(), PipelineError> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        self.finished = true;
        Ok(())
    }
}
