//! HTTP client for one inference backend
//!
//! Speaks the three endpoints the benchmark needs:
//! - `GET  /api/tags` - model discovery
//! - `GET  /api/ps` - running-model placement
//! - `POST /api/generate` - streaming and non-streaming generation
//!
//! Two timeouts are kept apart on purpose. The load timeout bounds the wait for
//! response headers, which is where the server loads weights into memory. The
//! stream timeout bounds reading the body once the first byte has arrived.

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use super::error::{classify_transport, EngineError};
use crate::config::{KeepAlive, RunnerConfig};
use crate::model::{InferenceOptions, PlacementSample, ServerTimings};

/// Body of `POST /api/generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'a InferenceOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<&'a KeepAlive>,
}

impl GenerateRequest<'_> {
    /// Serialize once; the bytes are cheap to clone for every retry
    pub fn to_body(&self) -> Result<Bytes, EngineError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(EngineError::Encode)
    }
}

/// Non-streaming response of `/api/generate` (durations in nanoseconds)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub load_duration: u64,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub eval_duration: u64,
    /// API-level failure reported with a 200 status
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateResponse {
    pub fn timings(&self) -> ServerTimings {
        ServerTimings {
            total_duration: Duration::from_nanos(self.total_duration),
            load_duration: Duration::from_nanos(self.load_duration),
            prompt_eval_count: self.prompt_eval_count,
            prompt_eval_duration: Duration::from_nanos(self.prompt_eval_duration),
            eval_count: self.eval_count,
            eval_duration: Duration::from_nanos(self.eval_duration),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<PsEntry>,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    size_vram: u64,
}

/// Endpoint client shared by every worker; cloning shares the connection pool
#[derive(Debug, Clone)]
pub struct EndpointClient {
    http: Client,
    load_timeout: Duration,
    stream_timeout: Duration,
}

impl EndpointClient {
    /// Create a client with the given load (header-wait) and stream (body) timeouts
    pub fn new(load_timeout: Duration, stream_timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder()
            // Outer safety net: loading plus generous generation headroom
            .timeout(load_timeout.saturating_add(stream_timeout.saturating_mul(2)))
            .build()
            .map_err(EngineError::Connection)?;

        Ok(Self {
            http,
            load_timeout,
            stream_timeout,
        })
    }

    pub fn from_config(config: &RunnerConfig) -> Result<Self, EngineError> {
        Self::new(config.load_timeout, config.stream_timeout)
    }

    pub fn stream_timeout(&self) -> Duration {
        self.stream_timeout
    }

    /// List models installed on `target`
    pub async fn list_models(&self, target: &str) -> Result<Vec<String>, EngineError> {
        let tags: TagsResponse = self.get_json(&endpoint(target, "api/tags")).await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Placement of `model` on `target`.
    ///
    /// A model that is not currently resident yields a zero sample, not an error.
    /// Names match exactly first, then by prefix (`llama3` finds `llama3:latest`).
    pub async fn placement(&self, target: &str, model: &str) -> Result<PlacementSample, EngineError> {
        let ps: PsResponse = self.get_json(&endpoint(target, "api/ps")).await?;

        let entry = ps
            .models
            .iter()
            .find(|m| m.name == model)
            .or_else(|| ps.models.iter().find(|m| m.name.starts_with(model)));

        Ok(entry
            .map(|m| PlacementSample::new(m.size, m.size_vram))
            .unwrap_or_default())
    }

    /// Issue one generate request and wait for its response headers.
    ///
    /// The header wait is bounded by the load timeout. Non-2xx responses are
    /// turned into [`EngineError::Server`] with the body text attached.
    pub async fn generate(&self, target: &str, body: Bytes) -> Result<Response, EngineError> {
        let url = endpoint(target, "api/generate");
        let request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let started = Instant::now();
        let response = match tokio::time::timeout(self.load_timeout, request.send()).await {
            Err(_) => return Err(EngineError::LoadTimeout(self.load_timeout)),
            Ok(Err(e)) => return Err(classify_transport(e, self.stream_timeout)),
            Ok(Ok(response)) => response,
        };
        tracing::debug!(url = %url, waited = ?started.elapsed(), "First byte received");

        let status = response.status();
        if !status.is_success() {
            let body = self.read_body(response).await.unwrap_or_default();
            return Err(EngineError::Server {
                status,
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        Ok(response)
    }

    /// Read a full response body within the stream timeout
    pub async fn read_body(&self, response: Response) -> Result<Bytes, EngineError> {
        match tokio::time::timeout(self.stream_timeout, response.bytes()).await {
            Err(_) => Err(EngineError::GenerationTimeout(self.stream_timeout)),
            Ok(result) => result.map_err(|e| classify_transport(e, self.stream_timeout)),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, EngineError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.stream_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::BadStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = self.read_body(response).await?;
        decode(url, &body)
    }
}

/// Adapt a streamed response body into a buffered byte reader
pub fn body_reader(response: Response) -> impl AsyncBufRead + Unpin {
    StreamReader::new(Box::pin(response.bytes_stream().map_err(io::Error::other)))
}

/// Decode a JSON body, keeping the raw text for diagnostics
pub(crate) fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, EngineError> {
    serde_json::from_slice(body).map_err(|source| EngineError::Decode {
        url: url.to_string(),
        body: String::from_utf8_lossy(body).into_owned(),
        source,
    })
}

fn endpoint(target: &str, path: &str) -> String {
    format!("{}/{}", target.trim_end_matches('/'), path)
}
