//! Image decoding and tensor preparation

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

use crate::error::OcrError;

/// Channel count of every decoded buffer.
pub const CHANNELS: usize = 3;

/// ImageNet statistics used by the detection and document classifiers.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Scaling to [-1, 1] used by the line classifier and the recognizer.
pub const HALF_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const HALF_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// A decoded image in row-major RGB layout.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: RgbImage,
}

impl PixelBuffer {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> usize {
        CHANNELS
    }

    /// Raw interleaved RGB bytes, `width * height * 3` long.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }
}

/// Decode image bytes into a three-channel buffer, honouring EXIF orientation.
pub fn decode_image(data: &[u8]) -> Result<PixelBuffer, OcrError> {
    if data.is_empty() {
        return Err(OcrError::Decode("image data is empty".to_string()));
    }

    let image = image::load_from_memory(data).map_err(|e| OcrError::Decode(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(OcrError::Decode(format!(
            "image has zero dimension ({}x{})",
            image.width(),
            image.height()
        )));
    }

    let oriented = apply_exif_orientation(data, image);
    Ok(PixelBuffer::from_rgb(oriented.into_rgb8()))
}

/// Phones often store rotation in EXIF instead of rotating pixels.
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Convert an RGB image into a 1xCxHxW tensor in BGR channel order.
///
/// PaddleOCR models are trained on OpenCV-decoded (BGR) input, so channel 0
/// of the tensor holds blue.
pub fn to_bgr_tensor(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    write_bgr(image, mean, std, &mut tensor, 0);
    tensor
}

/// Write `image` into batch slot `index` of `tensor`, left aligned.
///
/// The tensor may be wider than the image; the remainder stays zero.
pub fn write_bgr(
    image: &RgbImage,
    mean: [f32; 3],
    std: [f32; 3],
    tensor: &mut Array4<f32>,
    index: usize,
) {
    let max_w = tensor.shape()[3] as u32;
    let max_h = tensor.shape()[2] as u32;

    for (x, y, pixel) in image.enumerate_pixels() {
        if x >= max_w || y >= max_h {
            continue;
        }
        let (xi, yi) = (x as usize, y as usize);
        for (channel, source) in [2usize, 1, 0].into_iter().enumerate() {
            let value = pixel[source] as f32 / 255.0;
            tensor[[index, channel, yi, xi]] = (value - mean[channel]) / std[channel];
        }
    }
}

pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    image::imageops::resize(image, width.max(1), height.max(1), FilterType::Triangle)
}

/// Sizes used to map detection output back to the source image.
#[derive(Debug, Clone, Copy)]
pub struct ResizeInfo {
    pub original_width: u32,
    pub original_height: u32,
    pub resized_width: u32,
    pub resized_height: u32,
}

impl ResizeInfo {
    /// Scale so the longest side is at most `limit_side_len`, then round
    /// both sides to a multiple of 32 (the detector's stride).
    pub fn for_detection(original: (u32, u32), limit_side_len: u32) -> Self {
        let (orig_w, orig_h) = original;
        let longest = orig_w.max(orig_h) as f32;
        let ratio = if longest > limit_side_len as f32 {
            limit_side_len as f32 / longest
        } else {
            1.0
        };

        let round32 = |v: f32| -> u32 { (((v / 32.0).round() as u32) * 32).max(32) };

        Self {
            original_width: orig_w,
            original_height: orig_h,
            resized_width: round32(orig_w as f32 * ratio),
            resized_height: round32(orig_h as f32 * ratio),
        }
    }

    /// Convert map coordinates back to source image space.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = self.original_width as f32 / self.resized_width as f32;
        let sy = self.original_height as f32 / self.resized_height as f32;
        (
            (x * sx).clamp(0.0, self.original_width as f32),
            (y * sy).clamp(0.0, self.original_height as f32),
        )
    }
}

/// Crop the axis-aligned region spanned by `quad`.
pub fn crop_quad(image: &RgbImage, quad: &[[f32; 2]; 4]) -> Option<RgbImage> {
    let min_x = quad.iter().map(|p| p[0]).fold(f32::MAX, f32::min).max(0.0) as u32;
    let min_y = quad.iter().map(|p| p[1]).fold(f32::MAX, f32::min).max(0.0) as u32;
    let max_x = (quad.iter().map(|p| p[0]).fold(0.0, f32::max).ceil() as u32).min(image.width());
    let max_y = (quad.iter().map(|p| p[1]).fold(0.0, f32::max).ceil() as u32).min(image.height());

    let w = max_x.saturating_sub(min_x);
    let h = max_y.saturating_sub(min_y);
    if w == 0 || h == 0 {
        return None;
    }

    let mut crop = image::imageops::crop_imm(image, min_x, min_y, w, h).to_image();

    // Tall crops are usually vertical text; rotate so it reads left to right.
    if h as f32 >= w as f32 * 1.5 {
        crop = image::imageops::rotate270(&crop);
    }
    Some(crop)
}

/// Pad to `width` x `height` with black, image anchored top-left.
pub fn pad_to(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let mut padded: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([0u8, 0, 0]));
    image::imageops::replace(&mut padded, image, 0, 0);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([200u8, 100, 50]));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_decode_valid_png() {
        let buffer = decode_image(&png_bytes(40, 20)).unwrap();
        assert_eq!(buffer.width(), 40);
        assert_eq!(buffer.height(), 20);
        assert_eq!(buffer.channels(), 3);
        assert_eq!(buffer.as_raw().len(), 40 * 20 * 3);
        assert_eq!(&buffer.as_raw()[..3], &[200, 100, 50]);
    }

    #[test]
    fn test_decode_grayscale_becomes_three_channels() {
        let gray = image::GrayImage::from_pixel(8, 8, image::Luma([77u8]));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();

        let buffer = decode_image(bytes.get_ref()).unwrap();
        assert_eq!(buffer.channels(), 3);
        assert_eq!(&buffer.as_raw()[..3], &[77, 77, 77]);
    }

    #[test]
    fn test_decode_rejects_empty_garbage_and_truncated() {
        assert!(matches!(decode_image(&[]), Err(OcrError::Decode(_))));
        assert!(matches!(decode_image(b"definitely not an image"), Err(OcrError::Decode(_))));

        let png = png_bytes(64, 64);
        let truncated = &png[..png.len() / 2];
        assert!(matches!(decode_image(truncated), Err(OcrError::Decode(_))));
    }

    #[test]
    fn test_detection_resize_rounds_to_stride() {
        let info = ResizeInfo::for_detection((100, 100), 1280);
        assert_eq!((info.resized_width, info.resized_height), (96, 96));

        let info = ResizeInfo::for_detection((4000, 1000), 1280);
        assert_eq!(info.resized_width, 1280);
        assert_eq!(info.resized_height, 320);

        let (x, y) = info.to_original(640.0, 160.0);
        assert!((x - 2000.0).abs() < 1e-3);
        assert!((y - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_bgr_tensor_swaps_channels() {
        let image: RgbImage = ImageBuffer::from_pixel(2, 1, Rgb([255u8, 0, 0]));
        let tensor = to_bgr_tensor(&image, [0.0; 3], [1.0; 3]);
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 1.0);
    }

    #[test]
    fn test_crop_quad_clamps_to_image() {
        let image: RgbImage = ImageBuffer::from_pixel(50, 50, Rgb([0u8, 0, 0]));
        let quad = [[40.0, 10.0], [80.0, 10.0], [80.0, 20.0], [40.0, 20.0]];
        let crop = crop_quad(&image, &quad).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));

        let outside = [[60.0, 60.0], [70.0, 60.0], [70.0, 70.0], [60.0, 70.0]];
        assert!(crop_quad(&image, &outside).is_none());
    }
}
