//! Tablemill CLI
//!
//! Run composable CSV processing chains over chunked concurrent workers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tablemill::{build_runtime, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "tablemill")]
#[command(about = "Composable CSV processing pipeline", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Override chunk size
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.concurrency, cli.chunk_size)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn run_command(
    config_path: PathBuf,
    concurrency: Option<usize>,
    chunk_size: Option<usize>,
) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;

    // Apply overrides
    if let Some(c) = concurrency {
        config.processing.concurrency = c;
    }
    if let Some(c) = chunk_size {
        config.processing.chunk_size = c;
    }

    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async { run_pipeline(config).await })?;

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Tablemill Pipeline Configuration

# === INPUT: Where to read rows from ===
input:
  # Headerless CSV; every record is processed as a row
  path: "input.csv"

# === OUTPUT: Where to write the result ===
output:
  # Written to a temporary file and atomically renamed on success,
  # so a failed run never leaves a partial output behind
  path: "output.csv"

# === CHAIN: Operations applied to every row, in order ===
# Row operations (filters and transforms) may appear in any order.
# Aggregations (column_average, top_n) must come last in the chain.
chain:
  # Keep rows with global index in [start, end)
  - op: row_range
    start: 0
    end: 1000

  # Keep columns [start, end)
  - op: column_range
    start: 0
    end: 3

  # Apply a function to every cell
  # Functions: multiply (factor), add (amount), uppercase, lowercase, trim
  # - op: map_cells
  #   function:
  #     name: multiply
  #     factor: 2.0

  # Collapse each row to the sum of its columns.
  # on_bad_cell decides what a non-numeric cell does:
  #   zero_and_continue - the cell counts as zero
  #   abort_row         - the whole row is dropped
  #   abort_pipeline    - the run fails
  - op: sum_columns
    on_bad_cell: zero_and_continue

  # Per-column average over all rows (aggregate)
  # - op: column_average
  #   on_bad_cell: abort_row

  # Best n rows ranked by the value at column (aggregate)
  # - op: top_n
  #   n: 10
  #   column: 0

# === PROCESSING: Performance tuning ===
processing:
  # Rows per chunk
  chunk_size: 100

  # Number of chunks processed concurrently
  concurrency: 16

  # Tokio worker threads (null = num CPUs)
  # worker_threads: 8

  # Process rows one at a time instead of chunking across workers
  sequential: false

  # Spill completed chunks to files under this directory instead of
  # buffering them in memory (useful for very large inputs)
  # spill_dir: "/tmp/tablemill"

  # Print throughput metrics during processing
  enable_metrics: true

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # Save metrics JSON after the run completes
  # metrics_output_path: "metrics.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand - should default to Run
        let cli = Cli::try_parse_from(["tablemill"]);
        assert!(cli.is_ok());
        assert!(cli.unwrap().command.is_none());
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["tablemill", "-c", "other.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_overrides() {
        let cli = Cli::try_parse_from(["tablemill", "--concurrency", "4", "--chunk-size", "50"])
            .unwrap();
        assert_eq!(cli.concurrency, Some(4));
        assert_eq!(cli.chunk_size, Some(50));
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["tablemill", "validate", "-c", "test.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_generated_config_parses_and_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let config = Config::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chain.len(), 3);
    }
}
