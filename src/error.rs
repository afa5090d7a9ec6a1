//! Error types for the processing pipeline.
//!
//! Row-level recoverable failures (a non-numeric cell under a lenient
//! policy) are resolved inside the operations and never surface here.
//! Everything in this enum is fatal to the run, except that callers of
//! per-row application may translate an `abort-row` policy into a dropped
//! row before an error is ever constructed.

use thiserror::Error;

/// Fatal errors raised by chain construction, row processing, I/O, or
/// chunk reassembly.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid chain or processing parameters, detected before any output
    /// is written.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cell could not be coerced to a number under an `abort-pipeline`
    /// policy.
    #[error("{op}: non-numeric value {value:?} at row {row}, column {column}")]
    Coercion {
        op: &'static str,
        row: usize,
        column: usize,
        value: String,
    },

    /// An irrecoverable per-row failure, e.g. an explicitly configured
    /// column index that is out of range for the row.
    #[error("{op}: row {row}: {message}")]
    Row {
        op: &'static str,
        row: usize,
        message: String,
    },

    /// Read/write failure on the input or output collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decode/encode failure from the row reader/writer.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Chunk sequence gap or cross-chunk aggregate merge failure.
    #[error("merge error: {0}")]
    Merge(String),

    /// A chunk worker task failed to complete (panic or runtime shutdown).
    #[error("chunk {seq} worker failed: {message}")]
    Worker { seq: u64, message: String },
}

impl PipelineError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    /// Shorthand for a merge error.
    pub fn merge(msg: impl Into<String>) -> Self {
        PipelineError::Merge(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = PipelineError::Coercion {
            op: "sum_columns",
            row: 12,
            column: 3,
            value: "abc".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sum_columns"));
        assert!(msg.contains("12"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
