//! Inference attempt execution
//!
//! Every request runs as a sequence of guarded attempts:
//! - a fresh cancellation token and abort slot per attempt
//! - a placement guard polling `/api/ps` alongside the request
//! - an overall deadline of load timeout plus stream timeout
//! - a fixed delay between attempts; guard aborts are never retried

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::client::{body_reader, decode, EndpointClient, GenerateRequest, GenerateResponse};
use super::error::EngineError;
use super::guard::{AbortSlot, GuardSpec, PlacementGuard};
use super::stream::read_until_done;
use crate::config::RunnerConfig;
use crate::model::{BenchResult, InferenceOptions};

/// Runs health checks and benchmark requests against one target at a time
pub struct Executor {
    client: EndpointClient,
    config: Arc<RunnerConfig>,
}

impl Executor {
    pub fn new(client: EndpointClient, config: Arc<RunnerConfig>) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &EndpointClient {
        &self.client
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Streaming health check: succeeds once the server sends its `done` chunk
    pub async fn stream_check(&self, target: &str, model: &str) -> Result<(), EngineError> {
        let body = GenerateRequest {
            model,
            prompt: &self.config.prompt,
            stream: true,
            options: None,
            keep_alive: self.config.keep_alive.as_ref(),
        }
        .to_body()?;

        self.with_retries(target, model, "stream", || {
            self.stream_once(target, body.clone())
        })
        .await
    }

    /// Non-streaming benchmark of one option set.
    ///
    /// On success the result carries server timings, derived rates and a
    /// best-effort placement snapshot taken right after the response.
    pub async fn benchmark(
        &self,
        target: &str,
        model: &str,
        options: &InferenceOptions,
    ) -> Result<BenchResult, EngineError> {
        let timestamp = Utc::now();
        let started = Instant::now();

        let body = GenerateRequest {
            model,
            prompt: &self.config.prompt,
            stream: false,
            options: Some(options),
            keep_alive: self.config.keep_alive.as_ref(),
        }
        .to_body()?;

        let data = self
            .with_retries(target, model, "inference", || {
                self.generate_once(target, body.clone())
            })
            .await?;

        let timings = data.timings();
        let result = BenchResult::success(
            model,
            target,
            options,
            timestamp,
            started.elapsed(),
            data.response,
            timings,
        );

        // Capture placement before the server's idle timer can evict the model
        match self.client.placement(target, model).await {
            Ok(sample) if sample.size > 0 => Ok(result.with_placement(sample)),
            Ok(_) => {
                tracing::debug!(model, url = target, "Model no longer resident after run");
                Ok(result)
            }
            Err(e) => {
                tracing::debug!(model, url = target, error = %e, "Placement capture failed");
                Ok(result)
            }
        }
    }

    async fn stream_once(&self, target: &str, body: Bytes) -> Result<(), EngineError> {
        let response = self.client.generate(target, body).await?;

        let stream_timeout = self.client.stream_timeout();
        match tokio::time::timeout(stream_timeout, read_until_done(body_reader(response))).await {
            Err(_) => Err(EngineError::GenerationTimeout(stream_timeout)),
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::StreamIncomplete),
        }
    }

    async fn generate_once(&self, target: &str, body: Bytes) -> Result<GenerateResponse, EngineError> {
        let response = self.client.generate(target, body).await?;
        let url = response.url().to_string();
        let bytes = self.client.read_body(response).await?;

        let data: GenerateResponse = decode(&url, &bytes)?;
        match data.error.as_deref() {
            Some(message) if !message.is_empty() => Err(EngineError::Api(message.to_string())),
            _ => Ok(data),
        }
    }

    /// Drive `op` through up to `attempts` guarded attempts
    async fn with_retries<T, F, Fut>(
        &self,
        target: &str,
        model: &str,
        phase: &'static str,
        mut op: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let attempts = self.config.attempts();
        let mut last = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay).await;
                tracing::info!(phase, model, url = target, attempt, "Retrying");
            }

            tracing::info!(phase, model, url = target, "Request sent, waiting for model to load");
            match self.guarded(target, model, op()).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(phase, model, url = target, attempt, error = %e, "Attempt failed");
                    last = Some(e);
                }
            }
        }

        Err(EngineError::RetriesExhausted {
            attempts,
            last: Box::new(last.unwrap_or(EngineError::Cancelled)),
        })
    }

    /// Race one request against the placement guard and the attempt deadline
    async fn guarded<T>(
        &self,
        target: &str,
        model: &str,
        request: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let cancel = CancellationToken::new();
        let abort = AbortSlot::new();
        let deadline = self.config.attempt_deadline();

        let guard = PlacementGuard::spawn(
            self.client.clone(),
            GuardSpec {
                target: target.to_string(),
                model: model.to_string(),
                policy: self.config.placement_policy(),
                interval: self.config.placement_poll_interval,
                deadline,
            },
            cancel.clone(),
            abort.clone(),
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(deadline) => Err(EngineError::GenerationTimeout(deadline)),
            result = request => result,
        };

        guard.shutdown().await;

        // A pending abort outranks whatever error the request saw
        match (outcome, abort.reason()) {
            (Ok(value), _) => Ok(value),
            (Err(_), Some(reason)) => Err(EngineError::GuardAbort(reason.to_string())),
            (Err(e), None) => Err(e),
        }
    }
}
