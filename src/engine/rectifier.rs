//! UVDoc document unwarping
//!
//! Flattens curved or skewed pages before detection. The model takes a fixed
//! 512x512 BGR image scaled to [0, 1] and returns the rectified image in the
//! same layout.

use anyhow::{bail, Context, Result};
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::{ArrayView3, Axis, Ix4};

use super::preprocess::{resize, to_bgr_tensor};
use super::session::OnnxModel;

const INPUT_SIZE: u32 = 512;

pub struct DocumentRectifier {
    model: OnnxModel,
}

impl DocumentRectifier {
    pub fn new(model: OnnxModel) -> Self {
        Self { model }
    }

    /// Unwarp `image`, keeping its original dimensions.
    pub fn rectify(&mut self, image: &RgbImage) -> Result<RgbImage> {
        let (width, height) = image.dimensions();
        let resized = resize(image, INPUT_SIZE, INPUT_SIZE);
        let input = to_bgr_tensor(&resized, [0.0; 3], [1.0; 3]);

        let output = self.model.run(&input)?;
        let output = output
            .into_dimensionality::<Ix4>()
            .context("Unwarping output is not NCHW")?;
        let rectified = bgr_tensor_to_image(output.index_axis(Axis(0), 0))?;

        tracing::debug!(
            "Unwarped {}x{} page via {}x{} map",
            width,
            height,
            rectified.width(),
            rectified.height()
        );

        Ok(resize(&rectified, width, height))
    }
}

/// CHW BGR tensor in [0, 1] to an RGB image.
fn bgr_tensor_to_image(chw: ArrayView3<f32>) -> Result<RgbImage> {
    let (channels, height, width) = chw.dim();
    if channels != 3 || height == 0 || width == 0 {
        bail!("Unexpected unwarping output shape {:?}", chw.shape());
    }

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Ok(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            to_u8(chw[[2, y, x]]),
            to_u8(chw[[1, y, x]]),
            to_u8(chw[[0, y, x]]),
        ])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_tensor_to_image_swaps_and_clamps() {
        let mut chw = Array3::<f32>::zeros((3, 2, 2));
        chw[[0, 0, 0]] = 1.0; // blue
        chw[[2, 1, 1]] = 1.7; // red, out of range

        let image = bgr_tensor_to_image(chw.view()).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 255]));
        assert_eq!(image.get_pixel(1, 1), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let chw = Array3::<f32>::zeros((1, 4, 4));
        assert!(bgr_tensor_to_image(chw.view()).is_err());
    }
}
