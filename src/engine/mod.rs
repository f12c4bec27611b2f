//! Benchmark engine
//!
//! This module provides the fleet benchmarking pipeline:
//! - EndpointClient: HTTP calls to one Ollama-compatible target
//! - Executor: Guarded, retried health checks and benchmark requests
//! - PlacementGuard: Background placement polling with policy aborts
//! - Scheduler: Bounded-concurrency distribution of targets to workers

mod client;
mod error;
mod executor;
mod guard;
mod scheduler;
mod stream;

pub use client::{body_reader, EndpointClient, GenerateRequest, GenerateResponse};
pub use error::EngineError;
pub use executor::Executor;
pub use guard::{AbortSlot, GuardSpec, PlacementGuard, PlacementPolicy};
pub use scheduler::{partition_excluded, FleetReport, Scheduler, SkippedModel, TargetReport};
pub use stream::{read_until_done, StreamChunk};
