//! Stateful whole-table aggregate operations.
//!
//! Aggregates follow a two-phase protocol so that independently processed
//! chunks stay correct: each chunk worker accumulates an [`AggregateState`]
//! of its own, and the orchestrator folds the per-chunk partial states with
//! [`AggregateState::merge`] (in ascending chunk order) before a single
//! [`AggregateState::finalize`] produces the summary table.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::ops::row::CoercionPolicy;
use crate::table::{parse_number, Row, Table};

/// Candidate ordering for `TopN`.
///
/// The default ranks every numeric key above every non-numeric key,
/// comparing numerically (larger first) within the former and
/// lexicographically (larger first) within the latter. Comparing the two
/// classes per pair would not be transitive over mixed columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    #[default]
    NumericThenLexicographic,
    Lexicographic,
}

impl Comparator {
    /// Total order with best-ranked values first. Equal keys compare
    /// `Equal`, so a stable sort preserves arrival order among ties.
    pub fn ordering(&self, a: &str, b: &str) -> Ordering {
        match self {
            Comparator::NumericThenLexicographic => {
                match (parse_number(a), parse_number(b)) {
                    (Some(x), Some(y)) => y.total_cmp(&x),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => b.cmp(a),
                }
            }
            Comparator::Lexicographic => b.cmp(a),
        }
    }

    /// Whether `a` ranks strictly better than `b`.
    pub fn better(&self, a: &str, b: &str) -> bool {
        self.ordering(a, b) == Ordering::Less
    }
}

/// Configuration of one aggregate operation.
#[derive(Debug, Clone)]
pub enum AggregateOp {
    /// Per-column running average over all rows seen. With `columns`
    /// unset, the working column set is adopted from the first row.
    ColumnAverage {
        columns: Option<Vec<usize>>,
        policy: CoercionPolicy,
    },

    /// Bounded best-`n` rows keyed by the value at `column`.
    TopN {
        n: usize,
        column: usize,
        comparator: Comparator,
    },
}

impl AggregateOp {
    /// Operation identity used in error and log context.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOp::ColumnAverage { .. } => "column_average",
            AggregateOp::TopN { .. } => "top_n",
        }
    }

    /// Validate fixed parameters at chain construction.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            AggregateOp::ColumnAverage { columns: Some(cols), .. } if cols.is_empty() => Err(
                PipelineError::config("column_average: explicit column set must not be empty"),
            ),
            AggregateOp::TopN { n: 0, .. } => {
                Err(PipelineError::config("top_n: n must be at least 1"))
            }
            _ => Ok(()),
        }
    }

    /// Fresh per-chunk accumulator state for this operation.
    pub fn new_state(&self) -> AggregateState {
        match self {
            AggregateOp::ColumnAverage { columns, policy } => AggregateState::ColumnAverage {
                configured: columns.clone(),
                policy: *policy,
                columns: None,
                sums: Vec::new(),
                counts: Vec::new(),
            },
            AggregateOp::TopN { n, column, comparator } => AggregateState::TopN {
                n: *n,
                column: *column,
                comparator: *comparator,
                candidates: Vec::new(),
            },
        }
    }
}

/// Immutable-once-returned partial aggregate state for one chunk.
#[derive(Debug, Clone)]
pub enum AggregateState {
    ColumnAverage {
        /// Explicit column set from the operation, if any.
        configured: Option<Vec<usize>>,
        policy: CoercionPolicy,
        /// Working column set, fixed by the first row seen.
        columns: Option<Vec<usize>>,
        sums: Vec<f64>,
        counts: Vec<u64>,
    },
    TopN {
        n: usize,
        column: usize,
        comparator: Comparator,
        /// Held candidates, best first. At most `n` entries.
        candidates: Vec<(String, Row)>,
    },
}

impl AggregateState {
    /// Feed one (post filter/transform) row into the accumulator.
    pub fn observe(&mut self, row: &Row, row_index: usize) -> Result<(), PipelineError> {
        match self {
            AggregateState::ColumnAverage {
                configured,
                policy,
                columns,
                sums,
                counts,
            } => {
                // The first row fixes the aggregate's shape for the rest of
                // the run.
                let cols = columns.get_or_insert_with(|| {
                    configured
                        .clone()
                        .unwrap_or_else(|| (0..row.len()).collect())
                });
                if sums.is_empty() {
                    sums.resize(cols.len(), 0.0);
                    counts.resize(cols.len(), 0);
                }

                // Parse the whole row first so abort-row can exclude it
                // from every column's sum and count.
                let mut parsed: Vec<(usize, Option<f64>)> = Vec::with_capacity(cols.len());
                for (i, &col) in cols.iter().enumerate() {
                    if col >= row.len() {
                        // A later, narrower row skips out-of-range columns.
                        continue;
                    }
                    let value = parse_number(&row[col]);
                    if value.is_none() {
                        match policy {
                            CoercionPolicy::ZeroAndContinue => continue,
                            CoercionPolicy::AbortRow => return Ok(()),
                            CoercionPolicy::AbortPipeline => {
                                return Err(PipelineError::Coercion {
                                    op: "column_average",
                                    row: row_index,
                                    column: col,
                                    value: row[col].clone(),
                                })
                            }
                        }
                    }
                    parsed.push((i, value));
                }
                for (i, value) in parsed {
                    if let Some(v) = value {
                        sums[i] += v;
                        counts[i] += 1;
                    }
                }
                Ok(())
            }

            AggregateState::TopN {
                n,
                column,
                comparator,
                candidates,
            } => {
                if *column >= row.len() {
                    return Err(PipelineError::Row {
                        op: "top_n",
                        row: row_index,
                        message: format!(
                            "column index {column} out of range for row of width {}",
                            row.len()
                        ),
                    });
                }
                let key = row[*column].clone();
                if candidates.len() < *n {
                    candidates.push((key, row.clone()));
                } else if comparator.better(&key, &candidates[candidates.len() - 1].0) {
                    // Strictly better only, so the earliest row wins ties.
                    let last = candidates.len() - 1;
                    candidates[last] = (key, row.clone());
                } else {
                    return Ok(());
                }
                let cmp = *comparator;
                candidates.sort_by(|a, b| cmp.ordering(&a.0, &b.0));
                Ok(())
            }
        }
    }

    /// Associatively fold another partial state into this one.
    ///
    /// `other` must come from a later chunk of the same operation; folding
    /// in ascending chunk order keeps tie-breaks identical to a sequential
    /// run.
    pub fn merge(self, other: AggregateState) -> Result<AggregateState, PipelineError> {
        match (self, other) {
            (
                AggregateState::ColumnAverage {
                    configured,
                    policy,
                    columns: a_cols,
                    sums: a_sums,
                    counts: a_counts,
                },
                AggregateState::ColumnAverage {
                    columns: b_cols,
                    sums: b_sums,
                    counts: b_counts,
                    ..
                },
            ) => match (a_cols, b_cols) {
                (None, cols) => Ok(AggregateState::ColumnAverage {
                    configured,
                    policy,
                    columns: cols,
                    sums: b_sums,
                    counts: b_counts,
                }),
                (cols, None) => Ok(AggregateState::ColumnAverage {
                    configured,
                    policy,
                    columns: cols,
                    sums: a_sums,
                    counts: a_counts,
                }),
                (Some(a), Some(b)) => {
                    if a != b {
                        // Implicit column sets are always the prefix
                        // 0..width, so chunks over ragged-width input may
                        // legitimately differ in length. Anything else is
                        // a real mismatch.
                        let implicit_prefixes = configured.is_none()
                            && a.iter().enumerate().all(|(i, &c)| c == i)
                            && b.iter().enumerate().all(|(i, &c)| c == i);
                        if !implicit_prefixes {
                            return Err(PipelineError::merge(format!(
                                "column_average: chunk column sets differ ({a:?} vs {b:?})"
                            )));
                        }
                    }
                    // The earlier chunk saw the table's first row, so its
                    // shape is authoritative: a later chunk that only saw
                    // narrower rows is zero-padded, a wider one truncated.
                    let width = a.len();
                    let mut sums = a_sums;
                    let mut counts = a_counts;
                    for (i, v) in b_sums.into_iter().take(width).enumerate() {
                        sums[i] += v;
                    }
                    for (i, v) in b_counts.into_iter().take(width).enumerate() {
                        counts[i] += v;
                    }
                    Ok(AggregateState::ColumnAverage {
                        configured,
                        policy,
                        columns: Some(a),
                        sums,
                        counts,
                    })
                }
            },

            (
                AggregateState::TopN {
                    n,
                    column,
                    comparator,
                    mut candidates,
                },
                AggregateState::TopN {
                    candidates: later, ..
                },
            ) => {
                // Earlier-chunk candidates come first, so the stable sort
                // keeps the earliest row among equal keys.
                candidates.extend(later);
                candidates.sort_by(|a, b| comparator.ordering(&a.0, &b.0));
                candidates.truncate(n);
                Ok(AggregateState::TopN {
                    n,
                    column,
                    comparator,
                    candidates,
                })
            }

            _ => Err(PipelineError::merge(
                "cannot merge partial states of different aggregate kinds",
            )),
        }
    }

    /// Produce the final summary table. Called exactly once, after all
    /// partial states have been merged.
    pub fn finalize(self) -> Table {
        match self {
            AggregateState::ColumnAverage {
                columns,
                sums,
                counts,
                ..
            } => {
                if columns.is_none() {
                    // No rows seen, so the aggregate has no shape.
                    return Vec::new();
                }
                let row = sums
                    .iter()
                    .zip(&counts)
                    .map(|(&sum, &count)| {
                        if count == 0 {
                            "0.00".to_string()
                        } else {
                            format!("{:.2}", sum / count as f64)
                        }
                    })
                    .collect();
                vec![row]
            }
            AggregateState::TopN { candidates, .. } => {
                candidates.into_iter().map(|(_, row)| row).collect()
            }
        }
    }
}
