//! ONNX Runtime session wrapper

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ndarray::{Array4, ArrayD};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::logging::LogLevel;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use super::device::ComputeDevice;

/// A single-input, single-output model loaded on the process device.
pub struct OnnxModel {
    session: Session,
    input_name: String,
    output_name: String,
    path: PathBuf,
}

impl OnnxModel {
    pub fn load(path: &Path, device: ComputeDevice, intra_threads: usize) -> Result<Self> {
        if !path.exists() {
            bail!("Model file not found: {}", path.display());
        }

        let start = Instant::now();
        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_execution_providers(execution_providers(device))
            .context("Failed to register execution providers")?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .with_log_level(LogLevel::Error)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .with_context(|| format!("Model {} has no inputs", path.display()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .with_context(|| format!("Model {} has no outputs", path.display()))?;

        tracing::info!(
            "Loaded {} on {} in {:?}",
            path.display(),
            device,
            start.elapsed()
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            path: path.to_path_buf(),
        })
    }

    /// Run the model on an NCHW batch and copy out the first output.
    pub fn run(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let tensor = TensorRef::from_array_view(input.view())
            .with_context(|| format!("Failed to wrap input of shape {:?}", input.shape()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .with_context(|| format!("Inference failed for {}", self.path.display()))?;

        let output = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .with_context(|| format!("Output '{}' is not an f32 tensor", self.output_name))?;

        Ok(output.to_owned())
    }
}

/// CUDA first with CPU fallback on an accelerator, CPU only otherwise.
fn execution_providers(device: ComputeDevice) -> Vec<ExecutionProviderDispatch> {
    match device {
        ComputeDevice::Accelerator(index) => vec![
            CUDAExecutionProvider::default()
                .with_device_id(index as i32)
                .build(),
            CPUExecutionProvider::default().build(),
        ],
        ComputeDevice::GeneralPurpose => vec![CPUExecutionProvider::default().build()],
    }
}
