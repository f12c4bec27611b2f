//! CSV result file

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::SecondsFormat;

use super::ResultSink;
use crate::model::BenchResult;

pub const CSV_HEADER: [&str; 17] = [
    "model",
    "url",
    "config",
    "timestamp",
    "client_duration_s",
    "total_duration_s",
    "load_duration_s",
    "prompt_eval_s",
    "eval_duration_s",
    "prompt_tokens",
    "gen_tokens",
    "tokens_returned",
    "tokens_per_second",
    "vram_usage_mb",
    "vram_gpu_pct",
    "response",
    "error",
];

/// One row per result. The file is truncated on open and flushed per row.
pub struct CsvSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("failed to create csv output {}", path.display()))?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvSink {
    fn write(&self, result: &BenchResult) -> Result<()> {
        let row = to_row(result)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("csv writer lock poisoned"))?;
        writer
            .write_record(&row)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        writer.flush()?;
        Ok(())
    }
}

fn to_row(r: &BenchResult) -> Result<[String; 17]> {
    Ok([
        r.model.clone(),
        r.url.clone(),
        serde_json::to_string(&r.config)?,
        r.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        format!("{:.4}", r.duration.as_secs_f64()),
        format!("{:.4}", r.total_duration.as_secs_f64()),
        format!("{:.4}", r.load_duration.as_secs_f64()),
        format!("{:.4}", r.prompt_eval_duration.as_secs_f64()),
        format!("{:.4}", r.eval_duration.as_secs_f64()),
        r.prompt_eval_count.to_string(),
        r.tokens_generated.to_string(),
        r.tokens_returned.to_string(),
        format!("{:.2}", r.tokens_per_second),
        format!("{:.2}", r.vram_usage as f64 / 1024.0 / 1024.0),
        format!("{:.1}", r.vram_percentage),
        r.response.clone(),
        r.error.clone(),
    ])
}
