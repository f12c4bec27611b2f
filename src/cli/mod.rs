//! CLI commands
//!
//! Provides the fleet benchmarking interface for forest-runner.

mod list;
mod run;

pub use list::list_models;
pub use run::{run, run_fleet, RunArgs};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// forest-runner - Benchmarking and health auditing for Ollama fleets
#[derive(Parser)]
#[command(name = "forest-runner")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: first of runner.yaml, runner.conf, forest_runner.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the benchmark suite: discovery, streaming health check, then every
    /// inference config per model. Results go to CSV and JSON-lines files that
    /// are versioned (results.csv.1, ...) instead of overwritten.
    Run(RunArgs),

    /// List available models on target hosts
    ListModels {
        /// Comma-separated list of Ollama URLs
        #[arg(long, value_delimiter = ',')]
        urls: Vec<String>,
    },
}
