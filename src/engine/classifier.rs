//! Orientation classifiers
//!
//! - Text line: upright vs upside down (0/180), applied per crop.
//! - Document: 0/90/180/270, applied to the whole page before detection.

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{Array4, Axis, Ix2};

use super::preprocess::{
    resize, to_bgr_tensor, write_bgr, HALF_MEAN, HALF_STD, IMAGENET_MEAN, IMAGENET_STD,
};
use super::session::OnnxModel;
use crate::utils::math::{argmax, as_probabilities};

/// Text-line classifier input size (height, width).
const LINE_INPUT: (u32, u32) = (48, 192);

/// Document classifier resize and crop sizes.
const DOC_RESIZE_SHORT: u32 = 256;
const DOC_CROP: u32 = 224;

const DOC_ANGLES: [u32; 4] = [0, 90, 180, 270];

pub struct LineOrientationClassifier {
    model: OnnxModel,
    threshold: f32,
    batch_size: usize,
}

impl LineOrientationClassifier {
    pub fn new(model: OnnxModel, threshold: f32, batch_size: usize) -> Self {
        Self {
            model,
            threshold,
            batch_size: batch_size.max(1),
        }
    }

    /// Rotate upside-down crops in place. Returns how many were flipped.
    pub fn correct(&mut self, crops: &mut [RgbImage]) -> Result<usize> {
        let (height, width) = LINE_INPUT;
        let mut flipped = 0;

        for start in (0..crops.len()).step_by(self.batch_size) {
            let end = (start + self.batch_size).min(crops.len());
            let mut batch = Array4::<f32>::zeros((end - start, 3, height as usize, width as usize));
            for (slot, crop) in crops[start..end].iter().enumerate() {
                let resized = fit_line(crop, height, width);
                write_bgr(&resized, HALF_MEAN, HALF_STD, &mut batch, slot);
            }

            let output = self.model.run(&batch)?;
            let output = output
                .into_dimensionality::<Ix2>()
                .context("Line classifier output is not [batch, classes]")?;
            if output.shape()[0] != end - start {
                bail!(
                    "Line classifier returned {} rows for {} crops",
                    output.shape()[0],
                    end - start
                );
            }

            for (slot, row) in output.axis_iter(Axis(0)).enumerate() {
                let row: Vec<f32> = row.iter().cloned().collect();
                if is_upside_down(&row, self.threshold) {
                    let crop = &mut crops[start + slot];
                    *crop = image::imageops::rotate180(&*crop);
                    flipped += 1;
                }
            }
        }

        if flipped > 0 {
            tracing::debug!("Flipped {} upside-down text lines", flipped);
        }
        Ok(flipped)
    }
}

/// Resize to `height` keeping aspect ratio, never wider than `max_width`.
fn fit_line(crop: &RgbImage, height: u32, max_width: u32) -> RgbImage {
    let ratio = crop.width() as f32 / crop.height().max(1) as f32;
    let width = ((height as f32 * ratio).ceil() as u32).clamp(1, max_width);
    resize(crop, width, height)
}

fn is_upside_down(scores: &[f32], threshold: f32) -> bool {
    let (label, score) = argmax(&as_probabilities(scores));
    label == 1 && score > threshold
}

pub struct DocOrientationClassifier {
    model: OnnxModel,
}

impl DocOrientationClassifier {
    pub fn new(model: OnnxModel) -> Self {
        Self { model }
    }

    /// Predicted clockwise rotation of the page in degrees.
    pub fn classify(&mut self, image: &RgbImage) -> Result<(u32, f32)> {
        let input = to_bgr_tensor(&center_crop(image), IMAGENET_MEAN, IMAGENET_STD);
        let output = self.model.run(&input)?;
        let scores: Vec<f32> = output.iter().cloned().collect();
        if scores.len() != DOC_ANGLES.len() {
            bail!("Document classifier returned {} classes, expected 4", scores.len());
        }
        let (label, score) = argmax(&as_probabilities(&scores));
        Ok((DOC_ANGLES[label], score))
    }

    /// Return the page turned upright.
    pub fn correct(&mut self, image: RgbImage) -> Result<RgbImage> {
        let (angle, score) = self.classify(&image)?;
        if angle != 0 {
            tracing::debug!("Document rotated {} degrees (score {:.3}), correcting", angle, score);
        }
        Ok(undo_rotation(image, angle))
    }
}

/// Short side to 256, then the central 224x224.
fn center_crop(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let scale = DOC_RESIZE_SHORT as f32 / w.min(h).max(1) as f32;
    let rw = ((w as f32 * scale).round() as u32).max(DOC_CROP);
    let rh = ((h as f32 * scale).round() as u32).max(DOC_CROP);
    let resized = resize(image, rw, rh);
    let x = (rw - DOC_CROP) / 2;
    let y = (rh - DOC_CROP) / 2;
    image::imageops::crop_imm(&resized, x, y, DOC_CROP, DOC_CROP).to_image()
}

/// Turn a page rotated `angle` degrees clockwise back upright.
fn undo_rotation(image: RgbImage, angle: u32) -> RgbImage {
    match angle {
        90 => image::imageops::rotate270(&image),
        180 => image::imageops::rotate180(&image),
        270 => image::imageops::rotate90(&image),
        _ => image,
    }
}
