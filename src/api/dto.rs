//! REST API request/response data transfer objects

use serde::{Deserialize, Serialize};

use crate::engine::{TextRegion, VariantStatus};

/// JSON recognition request
#[derive(Debug, Deserialize)]
pub struct OcrJsonRequest {
    /// Base64 image, optionally as a data URL.
    pub image: Option<String>,
    #[serde(alias = "variant")]
    pub model: Option<String>,
}

/// Recognition response
#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub success: bool,
    pub variant: String,
    pub result: Vec<TextRegion>,
    pub inference_time_ms: u64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub device: String,
    pub accelerator_available: bool,
    pub accelerator_count: usize,
    pub runtime_loaded: bool,
    pub variants_loaded: Vec<String>,
    pub uptime_seconds: u64,
}

/// Service description served at `/`
#[derive(Debug, Serialize)]
pub struct ServiceInfoResponse {
    pub name: String,
    pub version: String,
    pub default_variant: String,
    pub endpoints: Vec<EndpointDto>,
    pub variants: Vec<VariantStatus>,
}

#[derive(Debug, Serialize)]
pub struct EndpointDto {
    pub method: String,
    pub path: String,
    pub description: String,
}

impl EndpointDto {
    pub fn new(method: &str, path: &str, description: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            description: description.to_string(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
