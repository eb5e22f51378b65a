//! Recognition error taxonomy
//!
//! Every failure that can reach a caller of the core is one of these four
//! kinds. The type is `Clone` so a single construction failure can be handed
//! to every caller that waited on it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcrError {
    /// Empty, truncated or unsupported image bytes.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// The requested variant has no configuration.
    #[error("Unknown variant '{requested}'. Valid options: {}", known.join(", "))]
    UnknownVariant { requested: String, known: Vec<String> },

    /// The engine for a known variant could not be built.
    #[error("Failed to construct engine for variant '{variant}': {message}")]
    Construction { variant: String, message: String },

    /// The engine failed while processing a valid image.
    #[error("Recognition failed for variant '{variant}': {message}")]
    Recognition { variant: String, message: String },
}

impl OcrError {
    pub fn construction(variant: &str, err: &anyhow::Error) -> Self {
        OcrError::Construction {
            variant: variant.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn recognition(variant: &str, err: &anyhow::Error) -> Self {
        OcrError::Recognition {
            variant: variant.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            OcrError::Decode(_) => "DECODE_FAILED",
            OcrError::UnknownVariant { .. } => "UNKNOWN_VARIANT",
            OcrError::Construction { .. } => "ENGINE_UNAVAILABLE",
            OcrError::Recognition { .. } => "RECOGNITION_FAILED",
        }
    }

    /// Whether the failure was caused by the request rather than the service.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, OcrError::Decode(_) | OcrError::UnknownVariant { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_variant_lists_known_ids() {
        let err = OcrError::UnknownVariant {
            requested: "nonexistent".to_string(),
            known: vec!["high-accuracy".to_string(), "standard".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown variant 'nonexistent'. Valid options: high-accuracy, standard"
        );
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_construction_keeps_error_chain() {
        let inner = anyhow::anyhow!("file not found").context("Failed to load detection model");
        let err = OcrError::construction("standard", &inner);
        assert_eq!(err.code(), "ENGINE_UNAVAILABLE");
        assert!(err.to_string().contains("Failed to load detection model: file not found"));
        assert!(!err.is_caller_error());
    }
}
