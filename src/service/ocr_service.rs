//! OCR Service - Core business logic
//!
//! Decodes request images and runs them through the cached engine for the
//! requested variant. All model work happens on the blocking thread pool.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::engine::registry::panic_message;
use crate::engine::{
    decode_image, DeviceSelection, EngineRegistry, PixelBuffer, RecognizeOptions, VariantStatus,
};
use crate::error::OcrError;

use super::types::*;

/// OCR recognition service
pub struct OcrService {
    registry: Arc<EngineRegistry>,
    selection: DeviceSelection,
    default_variant: String,
}

impl OcrService {
    pub fn new(
        registry: Arc<EngineRegistry>,
        selection: DeviceSelection,
        default_variant: &str,
    ) -> Self {
        Self {
            registry,
            selection,
            default_variant: default_variant.to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn default_variant(&self) -> &str {
        &self.default_variant
    }

    /// Recognize text in an encoded image.
    ///
    /// `variant` falls back to the configured default when `None`.
    pub async fn recognize(
        &self,
        image_data: Vec<u8>,
        variant: Option<String>,
    ) -> Result<RecognitionResult, OcrError> {
        let variant = variant.unwrap_or_else(|| self.default_variant.clone());
        let registry = self.registry.clone();
        let requested = variant.clone();

        tokio::task::spawn_blocking(move || recognize_bytes(&registry, &image_data, &requested))
            .await
            .unwrap_or_else(|e| {
                let message = if e.is_panic() {
                    format!("engine panicked: {}", panic_message(&*e.into_panic()))
                } else {
                    "recognition task was cancelled".to_string()
                };
                error!("Recognition task for '{}' failed: {}", variant, message);
                Err(OcrError::Recognition { variant, message })
            })
    }

    /// Device chosen at startup and what the runtime reported.
    pub fn describe_runtime(&self) -> RuntimeInfo {
        RuntimeInfo {
            device: self.selection.device.to_string(),
            accelerator_available: self.selection.accelerator_available,
            accelerator_count: self.selection.accelerator_count,
            runtime_loaded: self.selection.runtime_loaded,
        }
    }

    pub fn variants(&self) -> Vec<VariantStatus> {
        self.registry.status()
    }
}

/// Decode `image_data` and recognize it with `variant`.
///
/// The variant is checked before decoding so an unknown variant is reported
/// whatever the image contains.
pub fn recognize_bytes(
    registry: &EngineRegistry,
    image_data: &[u8],
    variant: &str,
) -> Result<RecognitionResult, OcrError> {
    registry.resolve(variant)?;
    let buffer = decode_image(image_data)?;
    debug!(
        "Decoded {}x{} image for variant '{}'",
        buffer.width(),
        buffer.height(),
        variant
    );
    recognize_buffer(registry, &buffer, variant)
}

/// Run the cached engine for `variant` on a decoded buffer.
pub fn recognize_buffer(
    registry: &EngineRegistry,
    buffer: &PixelBuffer,
    variant: &str,
) -> Result<RecognitionResult, OcrError> {
    let instance = registry.get_or_create(variant)?;

    let start = Instant::now();
    let regions = instance.recognize(buffer, &RecognizeOptions::default())?;
    let inference_time_ms = start.elapsed().as_millis() as u64;

    Ok(RecognitionResult {
        variant: instance.variant().to_string(),
        regions,
        inference_time_ms,
    })
}
