//! Compute device selection
//!
//! The device is chosen once at startup and handed to the engine registry;
//! nothing re-queries the runtime per request.

use std::fmt;
use std::path::{Path, PathBuf};

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DevicePreference;

/// Device every engine is constructed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Accelerator(usize),
    GeneralPurpose,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Accelerator(index) => write!(f, "gpu:{}", index),
            ComputeDevice::GeneralPurpose => write!(f, "cpu"),
        }
    }
}

/// What the inference runtime reports about accelerator support.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCapabilities {
    /// The runtime library could be loaded at all.
    pub runtime_loaded: bool,
    /// The runtime was built with an accelerator backend.
    pub accelerator_compiled: bool,
    /// Number of accelerator devices visible to this process.
    pub accelerator_count: usize,
}

/// Source of runtime capability information.
pub trait RuntimeProbe {
    fn capabilities(&self) -> RuntimeCapabilities;
}

/// Outcome of startup device selection, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelection {
    pub device: ComputeDevice,
    pub runtime_loaded: bool,
    pub accelerator_available: bool,
    pub accelerator_count: usize,
}

/// Pick the compute device. Never fails: every anomaly falls back to CPU.
pub fn select_device(probe: &dyn RuntimeProbe, preference: DevicePreference) -> DeviceSelection {
    let caps = probe.capabilities();

    info!(
        runtime_loaded = caps.runtime_loaded,
        accelerator_compiled = caps.accelerator_compiled,
        accelerator_count = caps.accelerator_count,
        preference = ?preference,
        "Runtime capabilities probed"
    );

    let device = match preference {
        DevicePreference::Cpu => ComputeDevice::GeneralPurpose,
        DevicePreference::Auto | DevicePreference::Gpu => {
            if !caps.accelerator_compiled {
                if preference == DevicePreference::Gpu {
                    warn!("GPU requested but the runtime has no accelerator support, using CPU");
                } else {
                    info!("Running on CPU (no accelerator support)");
                }
                ComputeDevice::GeneralPurpose
            } else if caps.accelerator_count > 0 {
                ComputeDevice::Accelerator(0)
            } else {
                warn!("Accelerator support present but no device detected, using CPU");
                ComputeDevice::GeneralPurpose
            }
        }
    };

    info!(device = %device, "Compute device selected");

    DeviceSelection {
        device,
        runtime_loaded: caps.runtime_loaded,
        accelerator_available: caps.accelerator_compiled,
        accelerator_count: caps.accelerator_count,
    }
}

/// Probes ONNX Runtime and the CUDA devices visible to the process.
pub struct OrtRuntimeProbe {
    library_path: Option<PathBuf>,
}

impl OrtRuntimeProbe {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    /// Load and initialise the runtime environment.
    fn load_runtime(&self) -> bool {
        let path = self.library_path.clone();
        // `ort` panics when the shared library cannot be opened.
        let result = std::panic::catch_unwind(move || {
            let builder = match path {
                Some(path) => ort::init_from(path.to_string_lossy()),
                None => ort::init(),
            };
            builder.with_name("roocr").commit()
        });

        match result {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!("Failed to initialise ONNX Runtime: {}", e);
                false
            }
            Err(_) => {
                warn!("ONNX Runtime library could not be loaded");
                false
            }
        }
    }
}

impl RuntimeProbe for OrtRuntimeProbe {
    fn capabilities(&self) -> RuntimeCapabilities {
        if !self.load_runtime() {
            return RuntimeCapabilities::default();
        }

        let accelerator_compiled = CUDAExecutionProvider::default().is_available().unwrap_or(false);
        let accelerator_count = if accelerator_compiled {
            visible_cuda_devices(
                std::env::var("CUDA_VISIBLE_DEVICES").ok().as_deref(),
                Path::new("/dev"),
            )
        } else {
            0
        };

        RuntimeCapabilities {
            runtime_loaded: true,
            accelerator_compiled,
            accelerator_count,
        }
    }
}

/// Count CUDA devices, honouring `CUDA_VISIBLE_DEVICES` when it is set.
fn visible_cuda_devices(visible: Option<&str>, dev_dir: &Path) -> usize {
    if let Some(list) = visible {
        let list = list.trim();
        if list.is_empty() || list == "-1" || list.eq_ignore_ascii_case("none") {
            return 0;
        }
        return list.split(',').filter(|s| !s.trim().is_empty()).count();
    }

    let Ok(entries) = std::fs::read_dir(dev_dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.strip_prefix("nvidia")
                .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
        .count()
}
