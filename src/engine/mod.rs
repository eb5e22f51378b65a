//! Inference engine module
//!
//! Provides:
//! - Startup compute device selection
//! - Image decoding into pixel buffers
//! - A registry of lazily constructed, shared engine instances
//! - The ONNX Runtime OCR pipeline used in production

pub mod classifier;
pub mod detector;
pub mod device;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod rectifier;
pub mod registry;
pub mod session;
pub mod traits;

pub use device::{select_device, ComputeDevice, DeviceSelection, OrtRuntimeProbe, RuntimeProbe};
pub use pipeline::OrtEngineFactory;
pub use preprocess::{decode_image, PixelBuffer};
pub use registry::{EngineInstance, EngineRegistry, VariantStatus};
pub use traits::{EngineFactory, OcrEngine, RecognizeOptions, TextRegion};
