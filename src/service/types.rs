//! Service layer types

use serde::Serialize;

use crate::engine::TextRegion;

/// Output of one recognition call
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionResult {
    /// Canonical id of the variant that ran.
    pub variant: String,
    /// Top to bottom, then left to right.
    pub regions: Vec<TextRegion>,
    pub inference_time_ms: u64,
}

/// Snapshot of the startup device decision
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    pub device: String,
    pub accelerator_available: bool,
    pub accelerator_count: usize,
    pub runtime_loaded: bool,
}
