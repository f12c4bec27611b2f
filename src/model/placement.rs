//! Model memory placement as reported by `/api/ps`

use serde::{Deserialize, Serialize};

/// Where a running model's weights live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Not resident (not loaded yet, or already evicted)
    NotLoaded,
    /// Entirely in accelerator memory
    FastMemory,
    /// Entirely in system memory
    SlowMemory,
    /// Partly offloaded to system memory
    Split,
}

/// Sizes reported for one running model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementSample {
    /// Total resident bytes
    pub size: u64,
    /// Bytes resident in accelerator memory
    pub size_vram: u64,
}

impl PlacementSample {
    pub fn new(size: u64, size_vram: u64) -> Self {
        Self { size, size_vram }
    }

    /// Classify the sample
    pub fn placement(&self) -> Placement {
        if self.size == 0 {
            Placement::NotLoaded
        } else if self.size_vram == 0 {
            Placement::SlowMemory
        } else if self.size_vram < self.size {
            Placement::Split
        } else {
            Placement::FastMemory
        }
    }

    /// Share of the model held in accelerator memory, 0-100
    pub fn vram_percentage(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.size_vram as f64 / self.size as f64 * 100.0
    }
}
