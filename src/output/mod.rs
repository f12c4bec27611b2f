//! Result sinks
//!
//! Every finished benchmark, success or failure, is handed to a [`ResultSink`]
//! as soon as it exists. Sinks flush per record so a crash mid-fleet loses at
//! most the run in flight.

mod csv_sink;
mod jsonl;

pub use csv_sink::{CsvSink, CSV_HEADER};
pub use jsonl::JsonLinesSink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::model::BenchResult;

/// Destination for benchmark results. Shared by all scheduler workers.
pub trait ResultSink: Send + Sync {
    fn write(&self, result: &BenchResult) -> Result<()>;
}

/// Writes each result to several sinks
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ResultSink>) {
        self.sinks.push(sink);
    }
}

impl ResultSink for FanoutSink {
    /// Tries every sink; the first error is returned after all have been tried
    fn write(&self, result: &BenchResult) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.write(result) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// `path` if nothing exists there, otherwise the first free `path.1`, `path.2`, ...
pub fn next_available_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let mut n = 1u32;
    loop {
        let mut candidate = path.as_os_str().to_os_string();
        candidate.push(format!(".{n}"));
        let candidate = PathBuf::from(candidate);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
