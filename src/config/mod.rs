//! Configuration system for forest-runner
//!
//! `RunnerConfig` is loaded from YAML, overridden by CLI flags, and then handed
//! to the engine fully resolved. The engine never reads files itself.

pub(crate) mod duration;
mod keep_alive;

pub use keep_alive::KeepAlive;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::PlacementPolicy;
use crate::model::InferenceOptions;

/// Upper bound for any single timeout or delay
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Config files searched in the working directory when no path is given
pub const DEFAULT_CONFIG_FILES: &[&str] = &["runner.yaml", "runner.conf", "forest_runner.yaml"];

/// Full configuration for a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Backend base URLs (one target per entry)
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    /// Prompt sent for both the health check and every benchmark config
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Directory receiving the CSV and JSON-lines outputs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// CSV file name inside `output_dir`
    #[serde(default = "default_output_file")]
    pub output_file: String,

    /// JSON-lines file name inside `output_dir`
    #[serde(default = "default_json_output_file")]
    pub json_output_file: String,

    /// Attempts per request (values below 1 behave as 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed sleep between attempts
    #[serde(default = "default_retry_delay", with = "duration")]
    pub retry_delay: Duration,

    /// Time allowed until response headers arrive (covers server-side model load)
    #[serde(default = "default_load_timeout", with = "duration")]
    pub load_timeout: Duration,

    /// Time allowed from first byte until the response body completes
    #[serde(default = "default_stream_timeout", with = "duration")]
    pub stream_timeout: Duration,

    /// Forwarded as `keep_alive` on every generate request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<KeepAlive>,

    /// Abort when any part of the model lands in system memory
    #[serde(default)]
    pub gpu_only: bool,

    /// Permit models that load entirely into system memory
    #[serde(default = "default_true")]
    pub cpu_only_allowed: bool,

    /// Case-insensitive substrings; matching model names are skipped
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Explicit model list (skips discovery when non-empty)
    #[serde(default)]
    pub models: Vec<String>,

    /// Option sets, each benchmarked independently per model
    #[serde(default = "default_inference_configs")]
    pub inference_configs: Vec<InferenceOptions>,

    /// Number of targets processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause between successful configs of the same model
    #[serde(default = "default_pacing_delay", with = "duration")]
    pub pacing_delay: Duration,

    /// Interval between `/api/ps` polls while a request is in flight
    #[serde(default = "default_poll_interval", with = "duration")]
    pub placement_poll_interval: Duration,

    /// Skip a model's benchmark configs when its streaming health check fails
    #[serde(default)]
    pub skip_on_health_check_failure: bool,
}

fn default_urls() -> Vec<String> {
    vec!["http://localhost:11434".to_string()]
}

fn default_prompt() -> String {
    "What is the capital of France?".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_file() -> String {
    "model_results.csv".to_string()
}

fn default_json_output_file() -> String {
    "model_results.json".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_load_timeout() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_stream_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_exclude() -> Vec<String> {
    vec!["embed".to_string(), "rerank".to_string()]
}

fn default_inference_configs() -> Vec<InferenceOptions> {
    [2048, 4096]
        .into_iter()
        .map(|num_ctx| {
            let mut options = InferenceOptions::new();
            options.insert("num_ctx".to_string(), num_ctx.into());
            options
        })
        .collect()
}

fn default_concurrency() -> usize {
    1
}

fn default_pacing_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            prompt: default_prompt(),
            output_dir: default_output_dir(),
            output_file: default_output_file(),
            json_output_file: default_json_output_file(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            load_timeout: default_load_timeout(),
            stream_timeout: default_stream_timeout(),
            keep_alive: None,
            gpu_only: false,
            cpu_only_allowed: true,
            exclude: default_exclude(),
            models: Vec::new(),
            inference_configs: default_inference_configs(),
            concurrency: default_concurrency(),
            pacing_delay: default_pacing_delay(),
            placement_poll_interval: default_poll_interval(),
            skip_on_health_check_failure: false,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve configuration for a run.
    ///
    /// An explicit path must exist and parse. Without one, the first of
    /// [`DEFAULT_CONFIG_FILES`] found in the working directory is used, and
    /// defaults apply when none exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_yaml(path);
        }

        for name in DEFAULT_CONFIG_FILES {
            let candidate = Path::new(name);
            if candidate.is_file() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::from_yaml(candidate);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            bail!("no target URLs configured");
        }
        if let Some(url) = self.urls.iter().find(|u| u.trim().is_empty()) {
            bail!("invalid empty target URL {:?}", url);
        }
        if self.prompt.trim().is_empty() {
            bail!("prompt is empty");
        }
        if self.load_timeout.is_zero() || self.stream_timeout.is_zero() {
            bail!("load_timeout and stream_timeout must be greater than zero");
        }
        if self.placement_poll_interval.is_zero() {
            bail!("placement_poll_interval must be greater than zero");
        }
        for (name, value) in [
            ("load_timeout", self.load_timeout),
            ("stream_timeout", self.stream_timeout),
            ("retry_delay", self.retry_delay),
            ("pacing_delay", self.pacing_delay),
            ("placement_poll_interval", self.placement_poll_interval),
        ] {
            if value > MAX_TIMEOUT {
                bail!(
                    "{} of {} exceeds the maximum of {}",
                    name,
                    humantime::format_duration(value),
                    humantime::format_duration(MAX_TIMEOUT)
                );
            }
        }
        Ok(())
    }

    /// Attempts per request, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Deadline for one attempt: model load plus generation
    pub fn attempt_deadline(&self) -> Duration {
        self.load_timeout.saturating_add(self.stream_timeout)
    }

    /// Placement rules enforced by the guard monitor
    pub fn placement_policy(&self) -> PlacementPolicy {
        PlacementPolicy {
            gpu_only: self.gpu_only,
            cpu_only_allowed: self.cpu_only_allowed,
        }
    }

    /// Worker count for a fleet of `targets` backends
    pub fn worker_count(&self, targets: usize) -> usize {
        self.concurrency.max(1).min(targets)
    }
}
