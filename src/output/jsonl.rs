//! JSON Lines result file

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};

use super::ResultSink;
use crate::model::BenchResult;

/// One JSON object per line, flushed after each record
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("failed to create json output {}", path.display()))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonLinesSink {
    fn write(&self, result: &BenchResult) -> Result<()> {
        let line = serde_json::to_string(result)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("json writer lock poisoned"))?;
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}
