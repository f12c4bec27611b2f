//! Fleet benchmark command

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::{KeepAlive, RunnerConfig};
use crate::engine::{EndpointClient, Executor, FleetReport, Scheduler};
use crate::output::{next_available_path, CsvSink, FanoutSink, JsonLinesSink, ResultSink};

/// Flags that override the loaded configuration
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Comma-separated list of Ollama URLs
    #[arg(long, value_delimiter = ',')]
    pub urls: Vec<String>,

    /// Output directory for results (CSV/JSON)
    #[arg(long, short)]
    pub output_dir: Option<PathBuf>,

    /// File whose contents replace the configured prompt
    #[arg(long, short)]
    pub prompt_file: Option<PathBuf>,

    /// Comma-separated substrings to exclude from model names
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Comma-separated list of models to run (skips discovery)
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Number of targets benchmarked in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl RunArgs {
    /// Apply non-empty flags on top of `config`
    pub fn apply(&self, config: &mut RunnerConfig) -> Result<()> {
        if !self.urls.is_empty() {
            config.urls = self.urls.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(path) = &self.prompt_file {
            config.prompt = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read prompt file {}", path.display()))?;
        }
        if !self.exclude.is_empty() {
            config.exclude = self.exclude.clone();
        }
        if !self.models.is_empty() {
            config.models = self.models.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        Ok(())
    }
}

/// Load configuration, apply overrides and benchmark the fleet
pub async fn run(config_path: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let mut config = RunnerConfig::load(config_path.as_deref())?;
    args.apply(&mut config)?;
    config.validate()?;

    let report = run_fleet(config).await?;
    if report.unreachable_targets() == report.targets.len() {
        tracing::warn!("No target could be reached");
    }
    Ok(())
}

/// Open the result files and run the scheduler to completion.
///
/// Only output setup can fail; per-target problems end up in the report.
pub async fn run_fleet(config: RunnerConfig) -> Result<FleetReport> {
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let mut sink = FanoutSink::default();

    let csv = CsvSink::create(next_available_path(
        &config.output_dir.join(&config.output_file),
    ))?;
    tracing::info!(path = %csv.path().display(), "Writing CSV results");
    sink.push(Arc::new(csv));

    if !config.json_output_file.is_empty() {
        let json = JsonLinesSink::create(next_available_path(
            &config.output_dir.join(&config.json_output_file),
        ))?;
        tracing::info!(path = %json.path().display(), "Writing JSON results");
        sink.push(Arc::new(json));
    }

    if config
        .keep_alive
        .as_ref()
        .is_some_and(KeepAlive::unloads_immediately)
    {
        tracing::warn!("keep_alive unloads models right after each request; VRAM columns will mostly read zero");
    }

    let sink: Arc<dyn ResultSink> = Arc::new(sink);
    let config = Arc::new(config);
    let client = EndpointClient::from_config(&config)?;
    let executor = Arc::new(Executor::new(client, Arc::clone(&config)));

    let started = Instant::now();
    let report = Scheduler::new(executor, sink).run().await;

    tracing::info!(
        elapsed = ?started.elapsed(),
        targets = report.targets.len(),
        results = report.results(),
        failures = report.failures(),
        skipped = report.skipped(),
        unreachable = report.unreachable_targets(),
        peak_concurrency = report.peak_active_targets,
        "Fleet run complete"
    );

    Ok(report)
}
