//! forest-runner - Benchmarking and health auditing for Ollama fleets
//!
//! Discovers the models served by one or more Ollama-compatible backends,
//! health-checks each with a streaming request and benchmarks it under a list
//! of option sets. Every outcome, success or failure, becomes one row in the
//! CSV and JSON-lines outputs.
//!
//! # Architecture
//!
//! - **engine**: HTTP client, placement guard, retried attempts, fleet scheduler
//! - **config**: YAML configuration with defaults
//! - **output**: CSV and JSON-lines result sinks
//! - **cli**: `run` and `list-models` commands
//!
//! # Example
//!
//! ```bash
//! # Benchmark two servers, two at a time
//! forest-runner run --urls http://gpu-1:11434,http://gpu-2:11434 --concurrency 2
//!
//! # List models on a server
//! forest-runner list-models --urls http://localhost:11434
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod model;
pub mod output;

// Re-export key types
pub use config::RunnerConfig;
pub use engine::{EndpointClient, EngineError, Executor, FleetReport, Scheduler};
pub use model::{BenchResult, InferenceOptions};
pub use output::ResultSink;
