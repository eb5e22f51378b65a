//! CRNN Text Recognizer
//!
//! Reads one text line per crop. The model emits per-timestep character
//! probabilities which are collapsed with greedy CTC decoding.

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{Array4, ArrayView2, Axis, Ix3};

use super::preprocess::{resize, write_bgr, HALF_MEAN, HALF_STD};
use super::session::OnnxModel;
use crate::config::RecognitionParams;
use crate::utils::math::{argmax, mean};

/// Batches never grow wider than this, however long the line.
const MAX_INPUT_WIDTH: u32 = 3200;

/// Recognized text and its confidence in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct LineText {
    pub text: String,
    pub confidence: f32,
}

pub struct TextRecognizer {
    model: OnnxModel,
    params: RecognitionParams,
    charset: Vec<String>,
}

impl TextRecognizer {
    pub fn new(model: OnnxModel, params: RecognitionParams, dictionary: &Path) -> Result<Self> {
        let charset = load_dictionary(dictionary, params.use_space_char)?;
        tracing::debug!("Loaded {} symbols from {}", charset.len() - 1, dictionary.display());
        Ok(Self {
            model,
            params,
            charset,
        })
    }

    /// Recognize every crop; output order matches input order.
    pub fn recognize(&mut self, crops: &[RgbImage]) -> Result<Vec<LineText>> {
        let height = self.params.image_height;
        let ratio = |img: &RgbImage| img.width() as f32 / img.height().max(1) as f32;

        // Similar widths batch together with less padding.
        let mut order: Vec<usize> = (0..crops.len()).collect();
        order.sort_by(|&a, &b| ratio(&crops[a]).total_cmp(&ratio(&crops[b])));

        let mut results = vec![
            LineText {
                text: String::new(),
                confidence: 0.0,
            };
            crops.len()
        ];

        for chunk in order.chunks(self.params.batch_size.max(1)) {
            let min_ratio = self.params.image_width as f32 / height as f32;
            let max_ratio = chunk
                .iter()
                .map(|&i| ratio(&crops[i]))
                .fold(min_ratio, f32::max);
            let width = ((height as f32 * max_ratio).ceil() as u32).min(MAX_INPUT_WIDTH);

            let mut batch = Array4::<f32>::zeros((chunk.len(), 3, height as usize, width as usize));
            for (slot, &i) in chunk.iter().enumerate() {
                let crop = &crops[i];
                let resized_w = ((height as f32 * ratio(crop)).ceil() as u32).clamp(1, width);
                let resized = resize(crop, resized_w, height);
                write_bgr(&resized, HALF_MEAN, HALF_STD, &mut batch, slot);
            }

            let output = self.model.run(&batch)?;
            let output = output
                .into_dimensionality::<Ix3>()
                .context("Recognition output is not [batch, time, classes]")?;
            if output.shape()[0] != chunk.len() {
                bail!(
                    "Recognition output batch {} does not match input batch {}",
                    output.shape()[0],
                    chunk.len()
                );
            }

            for (slot, &i) in chunk.iter().enumerate() {
                results[i] = ctc_decode(output.index_axis(Axis(0), slot), &self.charset);
            }
        }

        Ok(results)
    }
}

/// Index 0 is the CTC blank; the dictionary follows, then an optional space.
pub fn load_dictionary(path: &Path, use_space_char: bool) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary {}", path.display()))?;

    let mut charset = vec!["blank".to_string()];
    charset.extend(
        content
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string),
    );
    if charset.len() == 1 {
        bail!("Dictionary {} is empty", path.display());
    }
    if use_space_char {
        charset.push(" ".to_string());
    }
    Ok(charset)
}

/// Greedy CTC: best class per step, repeats collapsed, blanks dropped.
pub fn ctc_decode(probs: ArrayView2<f32>, charset: &[String]) -> LineText {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = 0usize;

    for row in probs.rows() {
        let row: Vec<f32> = row.iter().cloned().collect();
        let (index, score) = argmax(&row);
        if index != 0 && index != previous {
            if let Some(symbol) = charset.get(index) {
                text.push_str(symbol);
                scores.push(score);
            }
        }
        previous = index;
    }

    LineText {
        text,
        confidence: mean(&scores).clamp(0.0, 1.0),
    }
}
