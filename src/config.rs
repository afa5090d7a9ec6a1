//! Configuration for the tablemill pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ops::{AggregateOp, CellFn, Chain, CoercionPolicy, Comparator, RowOp};

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    pub input: InputConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Operations applied to every row, in order
    #[serde(default)]
    pub chain: Vec<OpSpec>,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Path to the input CSV file
    pub path: PathBuf,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Path the output CSV file is atomically renamed to on success
    pub path: PathBuf,
}

/// One operation in the chain, as written in a config file.
///
/// `row_range` bounds are signed so that a negative bound fails
/// validation with a clear message instead of a serde type error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpSpec {
    /// Keep rows with global index in `[start, end)`
    RowRange { start: i64, end: i64 },

    /// Keep columns `[start, end)`
    ColumnRange { start: usize, end: usize },

    /// Apply a named function to every cell
    MapCells { function: CellFnSpec },

    /// Collapse each row to the sum of its selected columns
    SumColumns {
        #[serde(default)]
        columns: Option<Vec<usize>>,
        #[serde(default = "default_zero_and_continue")]
        on_bad_cell: CoercionPolicy,
    },

    /// Collapse each row to the average of its selected columns
    AverageColumns {
        #[serde(default)]
        columns: Option<Vec<usize>>,
        #[serde(default = "default_abort_row")]
        on_bad_cell: CoercionPolicy,
    },

    /// Round every numeric cell up to the nearest integer
    Ceiling {
        #[serde(default = "default_abort_row")]
        on_bad_cell: CoercionPolicy,
    },

    /// Aggregate: per-column average over all rows
    ColumnAverage {
        #[serde(default)]
        columns: Option<Vec<usize>>,
        #[serde(default = "default_abort_row")]
        on_bad_cell: CoercionPolicy,
    },

    /// Aggregate: best n rows ranked by the value at `column`
    TopN {
        n: usize,
        column: usize,
        #[serde(default)]
        comparator: Comparator,
    },
}

/// Cell functions expressible in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum CellFnSpec {
    Multiply { factor: f64 },
    Add { amount: f64 },
    Uppercase,
    Lowercase,
    Trim,
}

impl From<CellFnSpec> for CellFn {
    fn from(spec: CellFnSpec) -> Self {
        match spec {
            CellFnSpec::Multiply { factor } => CellFn::Multiply(factor),
            CellFnSpec::Add { amount } => CellFn::Add(amount),
            CellFnSpec::Uppercase => CellFn::Uppercase,
            CellFnSpec::Lowercase => CellFn::Lowercase,
            CellFnSpec::Trim => CellFn::Trim,
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Rows per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of chunks processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Process rows one at a time on the calling thread instead of
    /// chunking across workers
    #[serde(default)]
    pub sequential: bool,

    /// Spill completed chunks to per-chunk files under this directory
    /// instead of buffering them in memory until emittable
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            concurrency: 16,
            worker_threads: None,
            sequential: false,
            spill_dir: None,
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    ///
    /// Chain-level rules (aggregate placement, per-op bounds) are checked
    /// by [`Config::build_chain`]; this catches everything else.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.path.as_os_str().is_empty() {
            anyhow::bail!("Input path must not be empty");
        }
        if self.output.path.as_os_str().is_empty() {
            anyhow::bail!("Output path must not be empty");
        }
        if self.processing.chunk_size == 0 {
            anyhow::bail!("Chunk size must be > 0");
        }
        if self.processing.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        self.build_chain()?;
        Ok(())
    }

    /// Translate the declarative chain into an executable [`Chain`].
    pub fn build_chain(&self) -> anyhow::Result<Chain> {
        let mut builder = Chain::builder();
        for spec in &self.chain {
            builder = match spec.clone() {
                OpSpec::RowRange { start, end } => {
                    if start < 0 || end < 0 {
                        anyhow::bail!("row_range bounds must be non-negative ({start}..{end})");
                    }
                    builder.with(RowOp::RowRange {
                        start: start as usize,
                        end: end as usize,
                    })
                }
                OpSpec::ColumnRange { start, end } => {
                    builder.with(RowOp::ColumnRange { start, end })
                }
                OpSpec::MapCells { function } => builder.with(RowOp::MapCells(function.into())),
                OpSpec::SumColumns {
                    columns,
                    on_bad_cell,
                } => builder.with(RowOp::SumColumns {
                    columns,
                    policy: on_bad_cell,
                }),
                OpSpec::AverageColumns {
                    columns,
                    on_bad_cell,
                } => builder.with(RowOp::AverageColumns {
                    columns,
                    policy: on_bad_cell,
                }),
                OpSpec::Ceiling { on_bad_cell } => builder.with(RowOp::Ceiling {
                    policy: on_bad_cell,
                }),
                OpSpec::ColumnAverage {
                    columns,
                    on_bad_cell,
                } => builder.with(AggregateOp::ColumnAverage {
                    columns,
                    policy: on_bad_cell,
                }),
                OpSpec::TopN {
                    n,
                    column,
                    comparator,
                } => builder.with(AggregateOp::TopN {
                    n,
                    column,
                    comparator,
                }),
            };
        }
        Ok(builder.build()?)
    }
}

// Default value functions for serde
fn default_chunk_size() -> usize {
    100
}
fn default_concurrency() -> usize {
    16
}
fn default_true() -> bool {
    true
}
fn default_metrics_interval() -> u64 {
    10
}
fn default_zero_and_continue() -> CoercionPolicy {
    CoercionPolicy::ZeroAndContinue
}
fn default_abort_row() -> CoercionPolicy {
    CoercionPolicy::AbortRow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml(chain: &str) -> String {
        format!(
            "input:\n  path: in.csv\noutput:\n  path: out.csv\nchain:\n{chain}"
        )
    }

    #[test]
    fn test_processing_defaults() {
        let config = Config::from_yaml("input:\n  path: in.csv\noutput:\n  path: out.csv\n").unwrap();
        assert_eq!(config.processing.chunk_size, 100);
        assert_eq!(config.processing.concurrency, 16);
        assert!(config.processing.enable_metrics);
        assert!(!config.processing.sequential);
        assert!(config.chain.is_empty());
    }

    #[test]
    fn test_chain_parses_ops_with_policy_defaults() {
        let yaml = minimal_yaml(
            "  - op: row_range\n    start: 0\n    end: 10\n  - op: sum_columns\n  - op: ceiling\n",
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.chain.len(), 3);
        assert!(matches!(
            config.chain[1],
            OpSpec::SumColumns {
                on_bad_cell: CoercionPolicy::ZeroAndContinue,
                ..
            }
        ));
        assert!(matches!(
            config.chain[2],
            OpSpec::Ceiling {
                on_bad_cell: CoercionPolicy::AbortRow
            }
        ));
        config.validate().unwrap();
    }

    #[test]
    fn test_chain_parses_map_cells_and_top_n() {
        let yaml = minimal_yaml(
            "  - op: map_cells\n    function:\n      name: multiply\n      factor: 2.5\n  - op: top_n\n    n: 3\n    column: 1\n",
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let chain = config.build_chain().unwrap();
        assert_eq!(chain.row_ops().len(), 1);
        assert_eq!(chain.aggregates().len(), 1);
    }

    #[test]
    fn test_negative_row_range_rejected() {
        let yaml = minimal_yaml("  - op: row_range\n    start: -1\n    end: 5\n");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.build_chain().is_err());
    }

    #[test]
    fn test_row_op_after_aggregate_rejected() {
        let yaml = minimal_yaml(
            "  - op: column_average\n  - op: ceiling\n",
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let yaml = "input:\n  path: in.csv\noutput:\n  path: out.csv\nprocessing:\n  chunk_size: 0\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = minimal_yaml("  - op: column_range\n    start: 1\n    end: 3\n");
        let config = Config::from_yaml(&yaml).unwrap();
        let rendered = config.to_yaml().unwrap();
        let reparsed = Config::from_yaml(&rendered).unwrap();
        assert_eq!(reparsed.chain.len(), 1);
        assert_eq!(reparsed.input.path, PathBuf::from("in.csv"));
    }
}
