//! Engine seams
//!
//! The registry only knows engines through these traits, so tests can swap in
//! scripted engines and the ONNX pipeline stays an implementation detail.

use serde::Serialize;

use crate::config::VariantConfig;
use crate::engine::device::ComputeDevice;
use crate::engine::preprocess::PixelBuffer;

/// One recognised line of text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRegion {
    /// Corners clockwise from top-left, in source image pixels.
    pub bbox: [[f32; 2]; 4],
    pub text: String,
    /// Mean character confidence, in [0, 1].
    pub confidence: f32,
}

/// Per-call switches passed to an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognizeOptions {
    /// Run orientation correction stages the variant has enabled.
    pub classify_angle: bool,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self { classify_angle: true }
    }
}

/// A constructed recognition engine.
///
/// Takes `&mut self`: callers must hold exclusive access while it runs.
pub trait OcrEngine: Send {
    fn recognize(
        &mut self,
        image: &PixelBuffer,
        options: &RecognizeOptions,
    ) -> anyhow::Result<Vec<TextRegion>>;
}

/// Builds engines for a variant on the process-wide device.
pub trait EngineFactory: Send + Sync {
    fn build(
        &self,
        variant_id: &str,
        config: &VariantConfig,
        device: ComputeDevice,
    ) -> anyhow::Result<Box<dyn OcrEngine>>;
}
