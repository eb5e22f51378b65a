//! Recognition against real models.
//!
//! Run with `ROOCR_MODEL_DIR=/path/to/standard cargo test -- --ignored`.
//! The directory must hold `det.onnx`, `rec.onnx`, `cls.onnx` and
//! `en_dict.txt`; ONNX Runtime is found via `ORT_DYLIB_PATH`.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use image::{Rgb, RgbImage};

use roocr::config::{Config, DevicePreference};
use roocr::engine::{select_device, EngineRegistry, OrtEngineFactory, OrtRuntimeProbe};
use roocr::service::ocr_service::recognize_bytes;
use roocr::OcrError;

const GLYPH_SCALE: u32 = 3;

fn glyph(c: char) -> [&'static str; 7] {
    match c {
        'T' => ["#####", "..#..", "..#..", "..#..", "..#..", "..#..", "..#.."],
        'E' => ["#####", "#....", "#....", "####.", "#....", "#....", "#####"],
        'S' => [".####", "#....", "#....", ".###.", "....#", "....#", "####."],
        _ => ["....."; 7],
    }
}

/// Black block letters on a white 100x100 canvas.
fn word_png(word: &str) -> Vec<u8> {
    let mut canvas = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
    let (mut x0, y0) = (12, 40);

    for c in word.chars() {
        for (row, line) in glyph(c).iter().enumerate() {
            for (col, cell) in line.chars().enumerate() {
                if cell != '#' {
                    continue;
                }
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        let x = x0 + col as u32 * GLYPH_SCALE + dx;
                        let y = y0 + row as u32 * GLYPH_SCALE + dy;
                        canvas.put_pixel(x, y, Rgb([0, 0, 0]));
                    }
                }
            }
        }
        x0 += 6 * GLYPH_SCALE;
    }

    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(canvas)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn registry(model_dir: PathBuf) -> EngineRegistry {
    let mut config = Config::default();
    let standard = config.variants.get_mut("standard").unwrap();
    standard.models.detection = model_dir.join("det.onnx");
    standard.models.recognition = model_dir.join("rec.onnx");
    standard.models.dictionary = model_dir.join("en_dict.txt");
    standard.models.textline_orientation = Some(model_dir.join("cls.onnx"));

    let probe = OrtRuntimeProbe::new(None);
    let selection = select_device(&probe, DevicePreference::Auto);
    assert!(selection.runtime_loaded, "ONNX Runtime could not be loaded");

    let factory = Arc::new(OrtEngineFactory::new(2, selection.runtime_loaded));
    EngineRegistry::new(&config, selection.device, factory).unwrap()
}

#[test]
#[ignore = "needs ONNX Runtime and model files in ROOCR_MODEL_DIR"]
fn test_recognizes_synthetic_word() {
    let model_dir =
        PathBuf::from(std::env::var("ROOCR_MODEL_DIR").expect("ROOCR_MODEL_DIR not set"));
    let registry = registry(model_dir);

    let result = recognize_bytes(&registry, &word_png("TEST"), "standard").unwrap();
    assert_eq!(result.variant, "standard");
    assert_eq!(result.regions.len(), 1, "regions: {:?}", result.regions);

    let region = &result.regions[0];
    assert_eq!(region.text.trim().to_uppercase(), "TEST");
    assert!(region.confidence > 0.5 && region.confidence <= 1.0);

    // Same engine instance on the second call
    let first = registry.get_or_create("standard").unwrap();
    let again = registry.get_or_create("ocr").unwrap();
    assert!(Arc::ptr_eq(&first, &again));
}

#[test]
#[ignore = "needs ONNX Runtime and model files in ROOCR_MODEL_DIR"]
fn test_real_engine_error_kinds() {
    let model_dir =
        PathBuf::from(std::env::var("ROOCR_MODEL_DIR").expect("ROOCR_MODEL_DIR not set"));
    let registry = registry(model_dir);

    assert!(matches!(
        recognize_bytes(&registry, &[], "standard"),
        Err(OcrError::Decode(_))
    ));
    assert!(matches!(
        recognize_bytes(&registry, &word_png("TEST"), "nonexistent"),
        Err(OcrError::UnknownVariant { .. })
    ));
}
