//! Per-row filter and transform operations.
//!
//! Every operation maps `(row, global row index)` to `Some(row)` or `None`
//! (row dropped). Numeric operations carry an explicit [`CoercionPolicy`]
//! deciding what a non-numeric cell does.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::table::{format_number, parse_number, Row};

/// What a numeric operation does when a cell fails to coerce to a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionPolicy {
    /// The cell contributes zero and processing continues.
    ZeroAndContinue,

    /// The whole row is dropped from the output.
    AbortRow,

    /// The run fails with a [`PipelineError::Coercion`].
    AbortPipeline,
}

/// A per-cell transform function for [`RowOp::MapCells`].
#[derive(Clone)]
pub enum CellFn {
    /// Multiply a numeric cell by a constant; non-numeric cells pass
    /// through unchanged.
    Multiply(f64),

    /// Add a constant to a numeric cell; non-numeric cells pass through
    /// unchanged.
    Add(f64),

    /// Uppercase the cell.
    Uppercase,

    /// Lowercase the cell.
    Lowercase,

    /// Trim surrounding whitespace.
    Trim,

    /// An arbitrary caller-supplied function.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl CellFn {
    /// Wrap a closure as a cell function.
    pub fn custom(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        CellFn::Custom(Arc::new(f))
    }

    /// Apply the function to one cell.
    pub fn apply(&self, cell: &str) -> String {
        match self {
            CellFn::Multiply(k) => match parse_number(cell) {
                Some(v) => format_number(v * k),
                None => cell.to_string(),
            },
            CellFn::Add(k) => match parse_number(cell) {
                Some(v) => format_number(v + k),
                None => cell.to_string(),
            },
            CellFn::Uppercase => cell.to_uppercase(),
            CellFn::Lowercase => cell.to_lowercase(),
            CellFn::Trim => cell.trim().to_string(),
            CellFn::Custom(f) => f(cell),
        }
    }
}

impl fmt::Debug for CellFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellFn::Multiply(k) => write!(f, "Multiply({k})"),
            CellFn::Add(k) => write!(f, "Add({k})"),
            CellFn::Uppercase => write!(f, "Uppercase"),
            CellFn::Lowercase => write!(f, "Lowercase"),
            CellFn::Trim => write!(f, "Trim"),
            CellFn::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A filter or transform applied to each row in chain order.
#[derive(Debug, Clone)]
pub enum RowOp {
    /// Keep rows whose global index falls in the half-open `[start, end)`.
    RowRange { start: usize, end: usize },

    /// Keep only columns `[start, end)`. The end is clamped to the row
    /// width; an empty or out-of-bounds range yields an empty row rather
    /// than an error.
    ColumnRange { start: usize, end: usize },

    /// Apply a function to every cell, same width out.
    MapCells(CellFn),

    /// Replace the row with the single-cell sum of the selected columns
    /// (all columns when `columns` is `None`).
    SumColumns {
        columns: Option<Vec<usize>>,
        policy: CoercionPolicy,
    },

    /// Replace the row with the single-cell average of the selected
    /// columns, formatted to two decimal places.
    AverageColumns {
        columns: Option<Vec<usize>>,
        policy: CoercionPolicy,
    },

    /// Round every numeric cell up to the nearest integer.
    Ceiling { policy: CoercionPolicy },
}

impl RowOp {
    /// Operation identity used in error and log context.
    pub fn name(&self) -> &'static str {
        match self {
            RowOp::RowRange { .. } => "row_range",
            RowOp::ColumnRange { .. } => "column_range",
            RowOp::MapCells(_) => "map_cells",
            RowOp::SumColumns { .. } => "sum_columns",
            RowOp::AverageColumns { .. } => "average_columns",
            RowOp::Ceiling { .. } => "ceiling",
        }
    }

    /// Validate fixed parameters. Called once at chain construction, so
    /// invalid configuration never reaches row time.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            RowOp::RowRange { start, end } if start > end => Err(PipelineError::config(format!(
                "row_range: start {start} is past end {end}"
            ))),
            RowOp::SumColumns { columns: Some(cols), .. }
            | RowOp::AverageColumns { columns: Some(cols), .. }
                if cols.is_empty() =>
            {
                Err(PipelineError::config(format!(
                    "{}: explicit column set must not be empty",
                    self.name()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Apply the operation to one row. `Ok(None)` means the row is dropped.
    pub fn apply(&self, row: Row, row_index: usize) -> Result<Option<Row>, PipelineError> {
        match self {
            RowOp::RowRange { start, end } => {
                if row_index >= *start && row_index < *end {
                    Ok(Some(row))
                } else {
                    Ok(None)
                }
            }

            RowOp::ColumnRange { start, end } => {
                let end = (*end).min(row.len());
                if *start >= end {
                    return Ok(Some(Vec::new()));
                }
                Ok(Some(row[*start..end].to_vec()))
            }

            RowOp::MapCells(f) => {
                Ok(Some(row.iter().map(|cell| f.apply(cell)).collect()))
            }

            RowOp::SumColumns { columns, policy } => {
                self.sum_row(row, row_index, columns.as_deref(), *policy)
            }

            RowOp::AverageColumns { columns, policy } => {
                self.average_row(row, row_index, columns.as_deref(), *policy)
            }

            RowOp::Ceiling { policy } => self.ceil_row(row, row_index, *policy),
        }
    }

    fn sum_row(
        &self,
        row: Row,
        row_index: usize,
        columns: Option<&[usize]>,
        policy: CoercionPolicy,
    ) -> Result<Option<Row>, PipelineError> {
        if row.is_empty() {
            return Ok(None);
        }
        let mut sum = 0.0;
        for col in selected_columns(self, &row, row_index, columns)? {
            match parse_number(&row[col]) {
                Some(v) => sum += v,
                None => match policy {
                    CoercionPolicy::ZeroAndContinue => {}
                    CoercionPolicy::AbortRow => return Ok(None),
                    CoercionPolicy::AbortPipeline => {
                        return Err(self.coercion_error(row_index, col, &row[col]))
                    }
                },
            }
        }
        Ok(Some(vec![format_number(sum)]))
    }

    fn average_row(
        &self,
        row: Row,
        row_index: usize,
        columns: Option<&[usize]>,
        policy: CoercionPolicy,
    ) -> Result<Option<Row>, PipelineError> {
        if row.is_empty() {
            return Ok(None);
        }
        let mut sum = 0.0;
        let mut count = 0u64;
        for col in selected_columns(self, &row, row_index, columns)? {
            match parse_number(&row[col]) {
                Some(v) => {
                    sum += v;
                    count += 1;
                }
                // A skipped cell contributes to neither sum nor count.
                None => match policy {
                    CoercionPolicy::ZeroAndContinue => {}
                    CoercionPolicy::AbortRow => return Ok(None),
                    CoercionPolicy::AbortPipeline => {
                        return Err(self.coercion_error(row_index, col, &row[col]))
                    }
                },
            }
        }
        if count == 0 {
            return Err(PipelineError::Row {
                op: self.name(),
                row: row_index,
                message: "no numeric data to compute an average".to_string(),
            });
        }
        Ok(Some(vec![format!("{:.2}", sum / count as f64)]))
    }

    fn ceil_row(
        &self,
        row: Row,
        row_index: usize,
        policy: CoercionPolicy,
    ) -> Result<Option<Row>, PipelineError> {
        let mut out = Vec::with_capacity(row.len());
        for (col, cell) in row.iter().enumerate() {
            match parse_number(cell) {
                Some(v) => out.push(format_number(v.ceil())),
                None => match policy {
                    CoercionPolicy::ZeroAndContinue => out.push("0".to_string()),
                    CoercionPolicy::AbortRow => return Ok(None),
                    CoercionPolicy::AbortPipeline => {
                        return Err(self.coercion_error(row_index, col, cell))
                    }
                },
            }
        }
        Ok(Some(out))
    }

    fn coercion_error(&self, row: usize, column: usize, value: &str) -> PipelineError {
        PipelineError::Coercion {
            op: self.name(),
            row,
            column,
            value: value.to_string(),
        }
    }
}

/// Resolve the column selection for a reducer. An explicitly configured
/// index past the row width is an irrecoverable per-row failure.
fn selected_columns(
    op: &RowOp,
    row: &Row,
    row_index: usize,
    columns: Option<&[usize]>,
) -> Result<Vec<usize>, PipelineError> {
    match columns {
        None => Ok((0..row.len()).collect()),
        Some(cols) => {
            for &col in cols {
                if col >= row.len() {
                    return Err(PipelineError::Row {
                        op: op.name(),
                        row: row_index,
                        message: format!(
                            "column index {col} out of range for row of width {}",
                            row.len()
                        ),
                    });
                }
            }
            Ok(cols.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row;

    #[test]
    fn test_row_range_half_open() {
        let op = RowOp::RowRange { start: 1, end: 3 };
        assert!(op.apply(row(["a"]), 0).unwrap().is_none());
        assert!(op.apply(row(["a"]), 1).unwrap().is_some());
        assert!(op.apply(row(["a"]), 2).unwrap().is_some());
        assert!(op.apply(row(["a"]), 3).unwrap().is_none());
    }

    #[test]
    fn test_row_range_invalid_bounds() {
        let op = RowOp::RowRange { start: 5, end: 2 };
        assert!(matches!(
            op.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_column_range_selects_and_clamps() {
        let op = RowOp::ColumnRange { start: 1, end: 10 };
        let out = op.apply(row(["a", "b", "c"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["b", "c"]));
    }

    #[test]
    fn test_column_range_out_of_bounds_yields_empty_row() {
        let op = RowOp::ColumnRange { start: 5, end: 7 };
        let out = op.apply(row(["a", "b"]), 0).unwrap().unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_map_cells_multiply_leaves_non_numeric_alone() {
        let op = RowOp::MapCells(CellFn::Multiply(2.0));
        let out = op.apply(row(["3", "x", "5"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["6", "x", "10"]));
    }

    #[test]
    fn test_map_cells_custom() {
        let op = RowOp::MapCells(CellFn::custom(|c| format!("<{c}>")));
        let out = op.apply(row(["a"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["<a>"]));
    }

    #[test]
    fn test_sum_columns_all() {
        let op = RowOp::SumColumns {
            columns: None,
            policy: CoercionPolicy::ZeroAndContinue,
        };
        let out = op.apply(row(["1", "2", "3"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["6"]));
    }

    #[test]
    fn test_sum_columns_subset() {
        let op = RowOp::SumColumns {
            columns: Some(vec![0, 2]),
            policy: CoercionPolicy::ZeroAndContinue,
        };
        let out = op.apply(row(["1", "2", "3"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["4"]));
    }

    #[test]
    fn test_sum_columns_zero_and_continue() {
        let op = RowOp::SumColumns {
            columns: None,
            policy: CoercionPolicy::ZeroAndContinue,
        };
        let out = op.apply(row(["1", "oops", "3"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["4"]));
    }

    #[test]
    fn test_sum_columns_abort_row_drops() {
        let op = RowOp::SumColumns {
            columns: None,
            policy: CoercionPolicy::AbortRow,
        };
        assert!(op.apply(row(["1", "oops"]), 0).unwrap().is_none());
    }

    #[test]
    fn test_sum_columns_abort_pipeline_fails() {
        let op = RowOp::SumColumns {
            columns: None,
            policy: CoercionPolicy::AbortPipeline,
        };
        let err = op.apply(row(["1", "oops"]), 7).unwrap_err();
        match err {
            PipelineError::Coercion { row, column, .. } => {
                assert_eq!(row, 7);
                assert_eq!(column, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sum_columns_out_of_range_index_is_fatal() {
        let op = RowOp::SumColumns {
            columns: Some(vec![9]),
            policy: CoercionPolicy::ZeroAndContinue,
        };
        assert!(matches!(
            op.apply(row(["1", "2"]), 0),
            Err(PipelineError::Row { .. })
        ));
    }

    #[test]
    fn test_sum_columns_empty_row_dropped() {
        let op = RowOp::SumColumns {
            columns: None,
            policy: CoercionPolicy::ZeroAndContinue,
        };
        assert!(op.apply(Vec::new(), 0).unwrap().is_none());
    }

    #[test]
    fn test_average_columns_two_decimals() {
        let op = RowOp::AverageColumns {
            columns: None,
            policy: CoercionPolicy::AbortRow,
        };
        let out = op.apply(row(["1", "2"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["1.50"]));
    }

    #[test]
    fn test_average_columns_abort_row() {
        let op = RowOp::AverageColumns {
            columns: None,
            policy: CoercionPolicy::AbortRow,
        };
        assert!(op.apply(row(["1", "x"]), 0).unwrap().is_none());
    }

    #[test]
    fn test_average_columns_skip_still_needs_data() {
        let op = RowOp::AverageColumns {
            columns: None,
            policy: CoercionPolicy::ZeroAndContinue,
        };
        // Every cell skipped leaves nothing to average.
        assert!(matches!(
            op.apply(row(["x", "y"]), 3),
            Err(PipelineError::Row { row: 3, .. })
        ));
    }

    #[test]
    fn test_ceiling_rounds_up() {
        let op = RowOp::Ceiling {
            policy: CoercionPolicy::AbortRow,
        };
        let out = op.apply(row(["1.2", "3", "-0.5"]), 0).unwrap().unwrap();
        assert_eq!(out, row(["2", "3", "0"]));
    }

    #[test]
    fn test_ceiling_abort_row_on_non_numeric() {
        let op = RowOp::Ceiling {
            policy: CoercionPolicy::AbortRow,
        };
        assert!(op.apply(row(["1.2", "x"]), 0).unwrap().is_none());
    }

    #[test]
    fn test_empty_column_set_rejected_at_validation() {
        let op = RowOp::SumColumns {
            columns: Some(vec![]),
            policy: CoercionPolicy::ZeroAndContinue,
        };
        assert!(op.validate().is_err());
    }
}
