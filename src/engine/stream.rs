//! Newline-delimited JSON stream consumption
//!
//! The streaming health check only cares whether the server reaches its
//! terminal `done` chunk. Malformed lines are logged and skipped so a single
//! bad chunk never fails an otherwise healthy stream.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest accepted line, excluding its newline
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// One streamed chunk of `/api/generate`
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

/// Consume `reader` until a chunk with `done: true` appears.
///
/// Returns `false` if the body closes first, the read fails or a line grows
/// past [`MAX_LINE_BYTES`]; callers treat that as an incomplete stream worth
/// retrying.
pub async fn read_until_done<R: AsyncBufRead + Unpin>(mut reader: R) -> bool {
    let mut line = Vec::new();
    let mut chunks = 0usize;
    let mut skipped = 0usize;

    loop {
        line.clear();
        let limit = MAX_LINE_BYTES as u64 + 1;
        match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(0) => {
                tracing::debug!(chunks, skipped, "Stream closed before done");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, chunks, "Stream scanning error");
                return false;
            }
        }

        if line.len() > MAX_LINE_BYTES && line.last() != Some(&b'\n') {
            tracing::warn!(limit = MAX_LINE_BYTES, chunks, "Stream line exceeds size limit");
            return false;
        }

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice::<StreamChunk>(trimmed) {
            Ok(chunk) => {
                chunks += 1;
                if chunk.done {
                    tracing::debug!(chunks, skipped, "Stream reached done");
                    return true;
                }
            }
            Err(_) => {
                skipped += 1;
                tracing::warn!(
                    chunk = %String::from_utf8_lossy(trimmed),
                    "Skipping invalid JSON chunk"
                );
            }
        }
    }
}
