//! Fleet scheduler
//!
//! Distributes backend targets over a fixed pool of worker tasks. A worker
//! owns a target from discovery to its last benchmark, so two models on the
//! same server never compete for its accelerator memory.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::Executor;
use crate::model::{BenchResult, InferenceOptions};
use crate::output::ResultSink;

/// A model dropped by the exclusion list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedModel {
    pub model: String,
    /// Exclusion entry that matched
    pub filter: String,
}

/// What happened on one target. Built by a single worker, merged after the run.
#[derive(Debug, Clone, Default)]
pub struct TargetReport {
    pub url: String,
    /// Models whose benchmark configs ran, in order
    pub tested: Vec<String>,
    pub skipped: Vec<SkippedModel>,
    /// Set when discovery failed and the target was abandoned
    pub discovery_error: Option<String>,
    /// Models whose streaming health check failed
    pub health_failures: Vec<String>,
    /// Results handed to the sink (successes and failures)
    pub results: usize,
    pub failures: usize,
}

impl TargetReport {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

/// Merged outcome of a fleet run
#[derive(Debug, Clone, Default)]
pub struct FleetReport {
    /// One report per target, in configuration order
    pub targets: Vec<TargetReport>,
    /// Most targets observed in flight at the same time
    pub peak_active_targets: usize,
}

impl FleetReport {
    pub fn results(&self) -> usize {
        self.targets.iter().map(|t| t.results).sum()
    }

    pub fn failures(&self) -> usize {
        self.targets.iter().map(|t| t.failures).sum()
    }

    pub fn skipped(&self) -> usize {
        self.targets.iter().map(|t| t.skipped.len()).sum()
    }

    pub fn unreachable_targets(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.discovery_error.is_some())
            .count()
    }
}

/// Split `models` into those to test and those excluded.
///
/// Matching is a case-insensitive substring test; blank entries match nothing.
pub fn partition_excluded(
    models: Vec<String>,
    exclude: &[String],
) -> (Vec<String>, Vec<SkippedModel>) {
    let filters: Vec<(&String, String)> = exclude
        .iter()
        .filter(|f| !f.trim().is_empty())
        .map(|f| (f, f.to_lowercase()))
        .collect();

    let mut keep = Vec::new();
    let mut skipped = Vec::new();

    for model in models {
        let lowered = model.to_lowercase();
        match filters.iter().find(|(_, needle)| lowered.contains(needle.as_str())) {
            Some((filter, _)) => skipped.push(SkippedModel {
                model,
                filter: (*filter).clone(),
            }),
            None => keep.push(model),
        }
    }

    (keep, skipped)
}

/// Counts targets in flight and remembers the high-water mark
#[derive(Debug, Default)]
struct ActiveGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveGauge {
    fn enter(&self) -> ActiveTicket<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveTicket(self)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveTicket<'a>(&'a ActiveGauge);

impl Drop for ActiveTicket<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency fleet runner
pub struct Scheduler {
    executor: Arc<Executor>,
    sink: Arc<dyn ResultSink>,
}

impl Scheduler {
    pub fn new(executor: Arc<Executor>, sink: Arc<dyn ResultSink>) -> Self {
        Self { executor, sink }
    }

    /// Benchmark every configured target and return the merged report
    pub async fn run(&self) -> FleetReport {
        let config = self.executor.config();
        let targets = config.urls.clone();
        let workers = config.worker_count(targets.len());

        tracing::info!(backends = targets.len(), concurrency = workers, "Starting fleet run");

        let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
            Arc::new(Mutex::new(targets.into_iter().enumerate().collect()));
        let gauge = Arc::new(ActiveGauge::default());

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let gauge = Arc::clone(&gauge);
            let executor = Arc::clone(&self.executor);
            let sink = Arc::clone(&self.sink);

            set.spawn(async move {
                let mut reports = Vec::new();
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, url)) = next else {
                        break;
                    };

                    let _ticket = gauge.enter();
                    reports.push((index, run_target(&executor, sink.as_ref(), &url).await));
                }
                reports
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_reports) => reports.extend(worker_reports),
                Err(e) => tracing::error!(error = %e, "Worker task failed"),
            }
        }
        reports.sort_by_key(|(index, _)| *index);

        FleetReport {
            targets: reports.into_iter().map(|(_, report)| report).collect(),
            peak_active_targets: gauge.peak(),
        }
    }
}

/// Discovery, exclusion, health check and benchmarks for one target
async fn run_target(executor: &Executor, sink: &dyn ResultSink, url: &str) -> TargetReport {
    let config = executor.config();
    let mut report = TargetReport::new(url);

    let models = if !config.models.is_empty() {
        tracing::info!(url, count = config.models.len(), "Using explicit model list");
        config.models.clone()
    } else {
        tracing::info!(url, "Discovering models");
        match executor.client().list_models(url).await {
            Ok(models) => {
                tracing::info!(url, count = models.len(), "Found models");
                models
            }
            Err(e) => {
                tracing::error!(url, error = %e, "Failed to discover models");
                report.discovery_error = Some(e.to_string());
                return report;
            }
        }
    };

    let (models, skipped) = partition_excluded(models, &config.exclude);
    for skip in &skipped {
        tracing::info!(model = %skip.model, url, filter = %skip.filter, "Skipping model (excluded)");
    }
    report.skipped = skipped;

    for model in models {
        if run_model(executor, sink, url, &model, &mut report).await {
            report.tested.push(model);
        }
    }

    report
}

/// Health check and benchmark one model. Returns whether the configs ran.
async fn run_model(
    executor: &Executor,
    sink: &dyn ResultSink,
    url: &str,
    model: &str,
    report: &mut TargetReport,
) -> bool {
    let config = executor.config();
    tracing::info!(model, url, "Testing model");

    match executor.stream_check(url, model).await {
        Ok(()) => tracing::info!(model, url, "Stream inference success"),
        Err(e) => {
            tracing::error!(model, url, error = %e, "Stream inference failed");
            report.health_failures.push(model.to_string());
            if config.skip_on_health_check_failure {
                tracing::warn!(model, url, "Skipping benchmark configs after failed health check");
                return false;
            }
        }
    }

    let configs = &config.inference_configs;
    for (index, options) in configs.iter().enumerate() {
        let described = describe(options);
        tracing::info!(model, url, config = %described, "Running inference config");

        let timestamp = Utc::now();
        match executor.benchmark(url, model, options).await {
            Ok(result) => {
                if result.tokens_generated == 0 {
                    tracing::warn!(
                        model,
                        url,
                        "Model returned success but generated 0 tokens. Context limit exceeded?"
                    );
                }
                tracing::info!(
                    model,
                    url,
                    duration = ?result.duration,
                    tokens_gen = result.tokens_generated,
                    tok_per_sec = %format!("{:.1}", result.tokens_per_second),
                    vram_pct = %format!("{:.1}%", result.vram_percentage),
                    "Inference success"
                );
                record(sink, &result, report);

                if index + 1 < configs.len() {
                    tokio::time::sleep(config.pacing_delay).await;
                }
            }
            Err(e) => {
                tracing::error!(
                    model,
                    url,
                    config = %described,
                    guard_abort = e.is_guard_abort(),
                    error = %e,
                    "Inference benchmark failed, skipping remaining configs for this model"
                );
                let result = BenchResult::failure(model, url, options, timestamp, &e);
                record(sink, &result, report);
                break;
            }
        }
    }

    true
}

fn record(sink: &dyn ResultSink, result: &BenchResult, report: &mut TargetReport) {
    report.results += 1;
    if result.is_failure() {
        report.failures += 1;
    }
    if let Err(e) = sink.write(result) {
        tracing::error!(model = %result.model, url = %result.url, error = %e, "Failed to write result");
    }
}

fn describe(options: &InferenceOptions) -> String {
    serde_json::to_string(options).unwrap_or_else(|_| format!("{options:?}"))
}
