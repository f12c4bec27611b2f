//! Shared fixtures: an in-process mock of the Ollama API and a recording sink

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use forest_runner::engine::{EndpointClient, Executor, FleetReport, Scheduler};
use forest_runner::{BenchResult, ResultSink, RunnerConfig};

/// How non-streaming `/api/generate` requests are answered
#[derive(Debug, Clone)]
pub enum GenerateMode {
    Ok,
    /// Sleep before answering successfully
    Delay(Duration),
    /// HTTP 500 with a plain-text body
    ServerError,
    /// HTTP 200 carrying an `error` field
    ApiError(String),
}

/// Shape of streaming `/api/generate` bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Complete,
    /// Valid chunks interleaved with undecodable lines
    Garbage,
    /// Closes before the `done` chunk
    Truncated,
    /// Sends one chunk, then neither data nor EOF
    Stall,
}

pub struct MockState {
    pub models: Vec<String>,
    /// `(size, size_vram)` reported by `/api/ps` once a benchmark request arrived
    pub placement: Option<(u64, u64)>,
    pub generate: GenerateMode,
    pub stream: StreamMode,
    pub tags_delay: Duration,
    pub response: String,
    pub eval_count: u64,
    pub eval_duration_ns: u64,

    pub tags_hits: AtomicUsize,
    pub ps_hits: AtomicUsize,
    pub stream_hits: AtomicUsize,
    pub generate_hits: AtomicUsize,
}

impl MockState {
    pub fn tags_hits(&self) -> usize {
        self.tags_hits.load(Ordering::SeqCst)
    }

    pub fn stream_hits(&self) -> usize {
        self.stream_hits.load(Ordering::SeqCst)
    }

    pub fn generate_hits(&self) -> usize {
        self.generate_hits.load(Ordering::SeqCst)
    }
}

pub struct MockOllama {
    pub url: String,
    pub state: Arc<MockState>,
}

impl MockOllama {
    pub fn builder() -> MockBuilder {
        MockBuilder {
            state: MockState {
                models: Vec::new(),
                placement: None,
                generate: GenerateMode::Ok,
                stream: StreamMode::Complete,
                tags_delay: Duration::ZERO,
                response: "The capital of France is Paris.".to_string(),
                eval_count: 100,
                eval_duration_ns: 2_000_000_000,
                tags_hits: AtomicUsize::new(0),
                ps_hits: AtomicUsize::new(0),
                stream_hits: AtomicUsize::new(0),
                generate_hits: AtomicUsize::new(0),
            },
        }
    }
}

pub struct MockBuilder {
    state: MockState,
}

impl MockBuilder {
    pub fn models(mut self, models: &[&str]) -> Self {
        self.state.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn placement(mut self, size: u64, size_vram: u64) -> Self {
        self.state.placement = Some((size, size_vram));
        self
    }

    pub fn generate(mut self, mode: GenerateMode) -> Self {
        self.state.generate = mode;
        self
    }

    pub fn stream(mut self, mode: StreamMode) -> Self {
        self.state.stream = mode;
        self
    }

    pub fn tags_delay(mut self, delay: Duration) -> Self {
        self.state.tags_delay = delay;
        self
    }

    pub async fn start(self) -> MockOllama {
        let state = Arc::new(self.state);
        let app = Router::new()
            .route("/api/tags", get(tags))
            .route("/api/ps", get(ps))
            .route("/api/generate", post(generate))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockOllama {
            url: format!("http://{addr}"),
            state,
        }
    }
}

async fn tags(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.tags_hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.tags_delay).await;
    let models: Vec<Value> = state.models.iter().map(|m| json!({ "name": m })).collect();
    Json(json!({ "models": models }))
}

async fn ps(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.ps_hits.fetch_add(1, Ordering::SeqCst);
    let resident = state.generate_hits.load(Ordering::SeqCst) > 0;
    let models: Vec<Value> = match state.placement {
        Some((size, size_vram)) if resident => state
            .models
            .iter()
            .map(|m| json!({ "name": m, "size": size, "size_vram": size_vram }))
            .collect(),
        _ => Vec::new(),
    };
    Json(json!({ "models": models }))
}

async fn generate(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let model = body["model"].as_str().unwrap_or_default().to_string();

    if body["stream"].as_bool().unwrap_or(false) {
        state.stream_hits.fetch_add(1, Ordering::SeqCst);
        return Body::from_stream(stream_chunks(state.stream)).into_response();
    }

    state.generate_hits.fetch_add(1, Ordering::SeqCst);
    match &state.generate {
        GenerateMode::Ok => {}
        GenerateMode::Delay(delay) => tokio::time::sleep(*delay).await,
        GenerateMode::ServerError => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "model runner crashed").into_response();
        }
        GenerateMode::ApiError(message) => {
            return Json(json!({ "error": message })).into_response();
        }
    }

    Json(json!({
        "model": model,
        "response": state.response,
        "done": true,
        "total_duration": 2_500_000_000u64,
        "load_duration": 400_000_000u64,
        "prompt_eval_count": 12,
        "prompt_eval_duration": 100_000_000u64,
        "eval_count": state.eval_count,
        "eval_duration": state.eval_duration_ns,
    }))
    .into_response()
}

fn stream_chunks(
    mode: StreamMode,
) -> impl futures::Stream<Item = Result<String, Infallible>> + Send + 'static {
    async_stream::stream! {
        yield Ok("{\"response\":\"The\",\"done\":false}\n".to_string());
        if mode == StreamMode::Stall {
            futures::future::pending::<()>().await;
        }
        if mode == StreamMode::Garbage {
            yield Ok("this is not json\n".to_string());
            yield Ok("{\"response\":\"trunc\n".to_string());
            yield Ok("\n".to_string());
        }
        yield Ok("{\"response\":\" capital\",\"done\":false}\n".to_string());
        if mode != StreamMode::Truncated {
            yield Ok("{\"response\":\"\",\"done\":true,\"eval_count\":2}\n".to_string());
        }
    }
}

/// Keeps every result in memory
#[derive(Default)]
pub struct MemorySink(Mutex<Vec<BenchResult>>);

impl MemorySink {
    pub fn results(&self) -> Vec<BenchResult> {
        self.0.lock().unwrap().clone()
    }
}

impl ResultSink for MemorySink {
    fn write(&self, result: &BenchResult) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(result.clone());
        Ok(())
    }
}

/// Fast timings suitable for tests
pub fn test_config(urls: &[&str]) -> RunnerConfig {
    RunnerConfig {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        load_timeout: Duration::from_secs(5),
        stream_timeout: Duration::from_secs(5),
        pacing_delay: Duration::from_millis(10),
        placement_poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn executor(config: RunnerConfig) -> Arc<Executor> {
    let client = EndpointClient::from_config(&config).unwrap();
    Arc::new(Executor::new(client, Arc::new(config)))
}

/// Run the scheduler with a memory sink
pub async fn run_fleet(config: RunnerConfig) -> (FleetReport, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let report = Scheduler::new(executor(config), sink.clone()).run().await;
    (report, sink)
}
