//! DB Text Detector
//!
//! Differentiable-binarization text detection: the model predicts a per-pixel
//! text probability map, which is thresholded into connected regions and
//! expanded back to full line boxes.

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{Array2, ArrayView2, Ix4};

use super::preprocess::{resize, to_bgr_tensor, ResizeInfo, IMAGENET_MEAN, IMAGENET_STD};
use super::session::OnnxModel;
use crate::config::{DetectionParams, ScoreMode};

/// Quadrilateral, clockwise from top-left.
pub type Quad = [[f32; 2]; 4];

/// Regions with a side shorter than this (in map pixels) are noise.
const MIN_SIZE: f32 = 3.0;

/// Boxes whose tops differ by less than this are treated as one line.
const SAME_LINE_TOLERANCE: f32 = 10.0;

pub struct TextDetector {
    model: OnnxModel,
    params: DetectionParams,
}

impl TextDetector {
    pub fn new(model: OnnxModel, params: DetectionParams) -> Self {
        Self { model, params }
    }

    /// Detect text lines, returned in reading order.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Quad>> {
        let info = ResizeInfo::for_detection(image.dimensions(), self.params.limit_side_len);
        let resized = resize(image, info.resized_width, info.resized_height);
        let input = to_bgr_tensor(&resized, IMAGENET_MEAN, IMAGENET_STD);

        let output = self.model.run(&input)?;
        let output = output
            .into_dimensionality::<Ix4>()
            .context("Detection output is not NCHW")?;
        let prob = output.index_axis(ndarray::Axis(0), 0);
        let prob = prob.index_axis(ndarray::Axis(0), 0);

        let boxes = boxes_from_probability(prob, &self.params, &info);
        tracing::debug!(
            "Detected {} text boxes ({}x{} map)",
            boxes.len(),
            info.resized_width,
            info.resized_height
        );
        Ok(boxes)
    }
}

/// Accumulated statistics of one connected region of the bitmap.
#[derive(Debug, Clone, Copy)]
struct Region {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    prob_sum: f32,
    pixels: usize,
}

impl Region {
    fn width(&self) -> f32 {
        (self.max_x - self.min_x + 1) as f32
    }

    fn height(&self) -> f32 {
        (self.max_y - self.min_y + 1) as f32
    }
}

/// Turn a probability map into boxes in source image coordinates.
pub fn boxes_from_probability(
    prob: ArrayView2<f32>,
    params: &DetectionParams,
    info: &ResizeInfo,
) -> Vec<Quad> {
    let mut bitmap = prob.mapv(|p| p > params.thresh);
    if params.use_dilation {
        bitmap = dilate(&bitmap);
    }

    let mut boxes = Vec::new();
    for region in connected_regions(&bitmap, &prob, params.max_candidates) {
        if region.width().min(region.height()) < MIN_SIZE {
            continue;
        }

        let score = match params.score_mode {
            ScoreMode::Slow => region.prob_sum / region.pixels as f32,
            ScoreMode::Fast => rect_mean(&prob, &region),
        };
        if score < params.box_thresh {
            continue;
        }

        // Offset the shrunk kernel back out to the full text extent.
        let (w, h) = (region.width(), region.height());
        let distance = w * h * params.unclip_ratio / (2.0 * (w + h));
        if (w + 2.0 * distance).min(h + 2.0 * distance) < MIN_SIZE + 2.0 {
            continue;
        }

        let x0 = region.min_x as f32 - distance;
        let y0 = region.min_y as f32 - distance;
        let x1 = (region.max_x + 1) as f32 + distance;
        let y1 = (region.max_y + 1) as f32 + distance;

        let (x0, y0) = info.to_original(x0, y0);
        let (x1, y1) = info.to_original(x1, y1);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            continue;
        }

        boxes.push([[x0, y0], [x1, y0], [x1, y1], [x0, y1]]);
    }

    sort_reading_order(&mut boxes);
    boxes
}

/// Dilate with a 2x2 kernel anchored at its bottom-right cell.
fn dilate(bitmap: &Array2<bool>) -> Array2<bool> {
    let (h, w) = bitmap.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        bitmap[[y, x]]
            || (x > 0 && bitmap[[y, x - 1]])
            || (y > 0 && bitmap[[y - 1, x]])
            || (x > 0 && y > 0 && bitmap[[y - 1, x - 1]])
    })
}

/// 8-connected regions, scanned top-to-bottom.
fn connected_regions(bitmap: &Array2<bool>, prob: &ArrayView2<f32>, limit: usize) -> Vec<Region> {
    let (h, w) = bitmap.dim();
    let mut visited = Array2::<bool>::from_elem((h, w), false);
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if !bitmap[[y, x]] || visited[[y, x]] {
                continue;
            }
            if regions.len() >= limit {
                return regions;
            }

            let mut region = Region {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                prob_sum: 0.0,
                pixels: 0,
            };
            visited[[y, x]] = true;
            stack.push((y, x));

            while let Some((cy, cx)) = stack.pop() {
                region.min_x = region.min_x.min(cx);
                region.max_x = region.max_x.max(cx);
                region.min_y = region.min_y.min(cy);
                region.max_y = region.max_y.max(cy);
                region.prob_sum += prob[[cy, cx]];
                region.pixels += 1;

                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let ny = cy as i64 + dy;
                        let nx = cx as i64 + dx;
                        if ny < 0 || nx < 0 || ny >= h as i64 || nx >= w as i64 {
                            continue;
                        }
                        let (ny, nx) = (ny as usize, nx as usize);
                        if bitmap[[ny, nx]] && !visited[[ny, nx]] {
                            visited[[ny, nx]] = true;
                            stack.push((ny, nx));
                        }
                    }
                }
            }

            regions.push(region);
        }
    }

    regions
}

fn rect_mean(prob: &ArrayView2<f32>, region: &Region) -> f32 {
    let rect = prob.slice(ndarray::s![
        region.min_y..=region.max_y,
        region.min_x..=region.max_x
    ]);
    rect.mean().unwrap_or(0.0)
}

/// Top to bottom, then left to right within a line.
fn sort_reading_order(boxes: &mut [Quad]) {
    boxes.sort_by(|a, b| {
        a[0][1]
            .total_cmp(&b[0][1])
            .then(a[0][0].total_cmp(&b[0][0]))
    });

    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0
            && (boxes[j][0][1] - boxes[j - 1][0][1]).abs() < SAME_LINE_TOLERANCE
            && boxes[j][0][0] < boxes[j - 1][0][0]
        {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
}
