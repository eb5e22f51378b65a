//! ONNX OCR pipeline
//!
//! Stages, in order:
//! 1. Document orientation (optional)
//! 2. Document unwarping (optional)
//! 3. Text detection
//! 4. Text-line orientation (optional)
//! 5. Text recognition

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use super::classifier::{DocOrientationClassifier, LineOrientationClassifier};
use super::detector::TextDetector;
use super::device::ComputeDevice;
use super::preprocess::{crop_quad, PixelBuffer};
use super::recognizer::TextRecognizer;
use super::rectifier::DocumentRectifier;
use super::session::OnnxModel;
use super::traits::{EngineFactory, OcrEngine, RecognizeOptions, TextRegion};
use crate::config::VariantConfig;

pub struct OnnxOcrEngine {
    variant: String,
    detector: TextDetector,
    recognizer: TextRecognizer,
    line_classifier: Option<LineOrientationClassifier>,
    doc_classifier: Option<DocOrientationClassifier>,
    rectifier: Option<DocumentRectifier>,
    drop_score: f32,
}

impl OnnxOcrEngine {
    /// Load every model the variant enables.
    pub fn load(
        variant_id: &str,
        config: &VariantConfig,
        device: ComputeDevice,
        intra_threads: usize,
    ) -> Result<Self> {
        let models = &config.models;
        let orientation = &config.orientation;
        let load = |path: &Path| OnnxModel::load(path, device, intra_threads);

        let detector = TextDetector::new(
            load(models.detection.as_path()).context("Failed to load detection model")?,
            config.detection.clone(),
        );
        let recognizer = TextRecognizer::new(
            load(models.recognition.as_path()).context("Failed to load recognition model")?,
            config.recognition.clone(),
            &models.dictionary,
        )?;

        let line_classifier = match optional_stage(
            variant_id,
            "text-line orientation",
            orientation.classifies_lines(),
            models.textline_orientation.as_deref(),
        ) {
            Some(path) => Some(LineOrientationClassifier::new(
                load(path).context("Failed to load text-line orientation model")?,
                orientation.cls_thresh,
                orientation.batch_size,
            )),
            None => None,
        };

        let doc_classifier = match optional_stage(
            variant_id,
            "document orientation",
            orientation.use_doc_orientation,
            models.doc_orientation.as_deref(),
        ) {
            Some(path) => Some(DocOrientationClassifier::new(
                load(path).context("Failed to load document orientation model")?,
            )),
            None => None,
        };

        let rectifier = match optional_stage(
            variant_id,
            "document unwarping",
            orientation.use_doc_unwarping,
            models.doc_unwarping.as_deref(),
        ) {
            Some(path) => Some(DocumentRectifier::new(
                load(path).context("Failed to load document unwarping model")?,
            )),
            None => None,
        };

        Ok(Self {
            variant: variant_id.to_string(),
            detector,
            recognizer,
            line_classifier,
            doc_classifier,
            rectifier,
            drop_score: config.recognition.drop_score,
        })
    }
}

/// Path of an enabled stage, or `None` if it is disabled or has no model.
fn optional_stage<'a>(
    variant_id: &str,
    stage: &str,
    enabled: bool,
    path: Option<&'a Path>,
) -> Option<&'a Path> {
    match (enabled, path) {
        (true, Some(path)) => Some(path),
        (true, None) => {
            warn!(
                "Variant '{}' enables {} but configures no model; stage skipped",
                variant_id, stage
            );
            None
        }
        (false, _) => None,
    }
}

impl OcrEngine for OnnxOcrEngine {
    fn recognize(
        &mut self,
        image: &PixelBuffer,
        options: &RecognizeOptions,
    ) -> Result<Vec<TextRegion>> {
        let start = Instant::now();
        let mut page = image.as_rgb().clone();

        if options.classify_angle {
            if let Some(classifier) = self.doc_classifier.as_mut() {
                page = classifier.correct(page)?;
            }
        }
        if let Some(rectifier) = self.rectifier.as_mut() {
            page = rectifier.rectify(&page)?;
        }

        let boxes = self.detector.detect(&page)?;

        let mut quads = Vec::with_capacity(boxes.len());
        let mut crops = Vec::with_capacity(boxes.len());
        for quad in boxes {
            if let Some(crop) = crop_quad(&page, &quad) {
                quads.push(quad);
                crops.push(crop);
            }
        }

        if crops.is_empty() {
            debug!("[{}] No text found in {:?}", self.variant, start.elapsed());
            return Ok(Vec::new());
        }

        if options.classify_angle {
            if let Some(classifier) = self.line_classifier.as_mut() {
                classifier.correct(&mut crops)?;
            }
        }

        let lines = self.recognizer.recognize(&crops)?;
        if lines.len() != quads.len() {
            bail!("Recognizer returned {} lines for {} boxes", lines.len(), quads.len());
        }

        let regions: Vec<TextRegion> = quads
            .into_iter()
            .zip(lines)
            .filter(|(_, line)| !line.text.is_empty() && line.confidence >= self.drop_score)
            .map(|(bbox, line)| TextRegion {
                bbox,
                text: line.text,
                confidence: line.confidence,
            })
            .collect();

        debug!(
            "[{}] {} text regions in {:?}",
            self.variant,
            regions.len(),
            start.elapsed()
        );
        Ok(regions)
    }
}

/// Builds [`OnnxOcrEngine`]s on the selected device.
pub struct OrtEngineFactory {
    intra_threads: usize,
    runtime_loaded: bool,
}

impl OrtEngineFactory {
    pub fn new(intra_threads: usize, runtime_loaded: bool) -> Self {
        Self {
            intra_threads,
            runtime_loaded,
        }
    }
}

impl EngineFactory for OrtEngineFactory {
    fn build(
        &self,
        variant_id: &str,
        config: &VariantConfig,
        device: ComputeDevice,
    ) -> Result<Box<dyn OcrEngine>> {
        if !self.runtime_loaded {
            bail!("ONNX Runtime library is not loaded");
        }

        let start = Instant::now();
        let engine = OnnxOcrEngine::load(variant_id, config, device, self.intra_threads)?;
        info!(
            "Pipeline for '{}' loaded in {:?} (line cls: {}, doc ori: {}, unwarp: {})",
            variant_id,
            start.elapsed(),
            engine.line_classifier.is_some(),
            engine.doc_classifier.is_some(),
            engine.rectifier.is_some()
        );
        Ok(Box::new(engine))
    }
}
