//! Benchmark data types shared by the engine and the output writers

mod placement;
mod result;

pub use placement::{Placement, PlacementSample};
pub use result::{BenchResult, ServerTimings};

/// One option set sent as `options` on `/api/generate` (e.g. `num_ctx`, `temperature`)
pub type InferenceOptions = serde_json::Map<String, serde_json::Value>;
