//! The durable record of one benchmark run

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InferenceOptions, PlacementSample};

/// Timing and token counters reported by the server for one generation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServerTimings {
    pub total_duration: Duration,
    pub load_duration: Duration,
    pub prompt_eval_count: u64,
    pub prompt_eval_duration: Duration,
    pub eval_count: u64,
    pub eval_duration: Duration,
}

impl ServerTimings {
    /// Generation rate from the server's own counters
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.eval_duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.eval_count as f64 / secs
    }
}

/// Outcome of one (target, model, config) benchmark.
///
/// Durations serialize as integer nanoseconds. A record with a non-empty
/// `error` has every timing, token and placement field zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchResult {
    pub model: String,
    pub url: String,
    pub config: InferenceOptions,
    pub timestamp: DateTime<Utc>,

    /// Client-side wall clock for the successful attempt sequence
    #[serde(with = "nanos")]
    pub duration: Duration,
    #[serde(with = "nanos")]
    pub total_duration: Duration,
    #[serde(with = "nanos")]
    pub load_duration: Duration,
    pub prompt_eval_count: u64,
    #[serde(with = "nanos")]
    pub prompt_eval_duration: Duration,
    pub eval_count: u64,
    #[serde(with = "nanos")]
    pub eval_duration: Duration,

    // Resource usage (from /api/ps)
    #[serde(rename = "memory_usage_bytes")]
    pub memory_usage: u64,
    #[serde(rename = "vram_usage_bytes")]
    pub vram_usage: u64,
    pub vram_percentage: f64,

    pub tokens_generated: u64,
    pub tokens_returned: u64,
    pub tokens_per_second: f64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl BenchResult {
    fn empty(model: &str, url: &str, config: &InferenceOptions, timestamp: DateTime<Utc>) -> Self {
        Self {
            model: model.to_string(),
            url: url.to_string(),
            config: config.clone(),
            timestamp,
            duration: Duration::ZERO,
            total_duration: Duration::ZERO,
            load_duration: Duration::ZERO,
            prompt_eval_count: 0,
            prompt_eval_duration: Duration::ZERO,
            eval_count: 0,
            eval_duration: Duration::ZERO,
            memory_usage: 0,
            vram_usage: 0,
            vram_percentage: 0.0,
            tokens_generated: 0,
            tokens_returned: 0,
            tokens_per_second: 0.0,
            response: String::new(),
            error: String::new(),
        }
    }

    /// Record for a completed generation.
    ///
    /// `eval_count` is the authoritative token count; the whitespace word count
    /// of the response is kept as `tokens_returned` for cross-checking.
    pub fn success(
        model: &str,
        url: &str,
        config: &InferenceOptions,
        timestamp: DateTime<Utc>,
        duration: Duration,
        response: String,
        timings: ServerTimings,
    ) -> Self {
        Self {
            duration,
            total_duration: timings.total_duration,
            load_duration: timings.load_duration,
            prompt_eval_count: timings.prompt_eval_count,
            prompt_eval_duration: timings.prompt_eval_duration,
            eval_count: timings.eval_count,
            eval_duration: timings.eval_duration,
            tokens_generated: timings.eval_count,
            tokens_returned: response.split_whitespace().count() as u64,
            tokens_per_second: timings.tokens_per_second(),
            response,
            ..Self::empty(model, url, config, timestamp)
        }
    }

    /// Record for a run that exhausted its retries or was aborted
    pub fn failure(
        model: &str,
        url: &str,
        config: &InferenceOptions,
        timestamp: DateTime<Utc>,
        error: impl std::fmt::Display,
    ) -> Self {
        let mut error = error.to_string();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            error,
            ..Self::empty(model, url, config, timestamp)
        }
    }

    /// Attribute memory placement captured right after the run
    pub fn with_placement(mut self, sample: PlacementSample) -> Self {
        self.memory_usage = sample.size;
        self.vram_usage = sample.size_vram;
        self.vram_percentage = sample.vram_percentage();
        self
    }

    pub fn is_failure(&self) -> bool {
        !self.error.is_empty()
    }
}

mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}
