//! Service layer module

pub mod ocr_service;
pub mod types;

pub use ocr_service::OcrService;
pub use types::*;
