//! OCR service configuration

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default = "default_variants")]
    pub variants: BTreeMap<String, VariantConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_mb: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            body_limit_mb: 10,
            request_timeout_secs: 60,
        }
    }
}

/// Which compute device the operator wants engines to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Auto,
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: DevicePreference,
    /// Location of the ONNX Runtime shared library. Falls back to
    /// `ORT_DYLIB_PATH` and then the platform default name.
    pub onnxruntime_path: Option<PathBuf>,
    pub intra_threads: usize,
    pub default_variant: String,
    /// Variants constructed at startup instead of on first request.
    pub preload: Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: DevicePreference::Auto,
            onnxruntime_path: None,
            intra_threads: 4,
            default_variant: "standard".to_string(),
            preload: Vec::new(),
        }
    }
}

/// Tuning profile for one engine variant
#[derive(Debug, Clone, Deserialize)]
pub struct VariantConfig {
    #[serde(default)]
    pub aliases: Vec<String>,
    pub models: VariantModels,
    #[serde(default)]
    pub detection: DetectionParams,
    #[serde(default)]
    pub recognition: RecognitionParams,
    #[serde(default)]
    pub orientation: OrientationParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariantModels {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    /// Character dictionary for CTC decoding, one symbol per line.
    pub dictionary: PathBuf,
    pub textline_orientation: Option<PathBuf>,
    pub doc_orientation: Option<PathBuf>,
    pub doc_unwarping: Option<PathBuf>,
}

/// How a candidate box is scored against the probability map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Mean probability over the box's bounding rectangle.
    Fast,
    /// Mean probability over the region's own pixels.
    Slow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    pub thresh: f32,
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub limit_side_len: u32,
    pub max_candidates: usize,
    pub use_dilation: bool,
    pub score_mode: ScoreMode,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            limit_side_len: 960,
            max_candidates: 1000,
            use_dilation: false,
            score_mode: ScoreMode::Fast,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionParams {
    pub image_height: u32,
    /// Minimum input width; wider crops grow the batch width.
    pub image_width: u32,
    pub batch_size: usize,
    pub use_space_char: bool,
    /// Lines recognised with lower confidence are dropped.
    pub drop_score: f32,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            image_height: 48,
            image_width: 320,
            batch_size: 6,
            use_space_char: true,
            drop_score: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrientationParams {
    /// Classify each text line as upright or upside down.
    pub use_angle_cls: bool,
    pub use_textline_orientation: bool,
    pub use_doc_orientation: bool,
    pub use_doc_unwarping: bool,
    pub cls_thresh: f32,
    pub batch_size: usize,
}

impl Default for OrientationParams {
    fn default() -> Self {
        Self {
            use_angle_cls: true,
            use_textline_orientation: false,
            use_doc_orientation: false,
            use_doc_unwarping: false,
            cls_thresh: 0.9,
            batch_size: 6,
        }
    }
}

impl OrientationParams {
    /// Whether per-line 0/180 classification runs when the caller asks for it.
    pub fn classifies_lines(&self) -> bool {
        self.use_angle_cls || self.use_textline_orientation
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path))?;
        Ok(config)
    }

    /// Config path from `ROOCR_CONFIG`, defaulting to `config.toml`.
    pub fn default_path() -> String {
        std::env::var("ROOCR_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }

    /// Apply environment overrides (`PORT`).
    pub fn apply_env(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Map every alias and canonical id to its canonical id.
    pub fn alias_table(&self) -> anyhow::Result<HashMap<String, String>> {
        let mut table = HashMap::new();
        for (id, variant) in &self.variants {
            if let Some(existing) = table.insert(id.clone(), id.clone()) {
                bail!("Variant id '{}' collides with an alias of '{}'", id, existing);
            }
            for alias in &variant.aliases {
                if let Some(existing) = table.insert(alias.clone(), id.clone()) {
                    bail!("Alias '{}' of '{}' is already used by '{}'", alias, id, existing);
                }
            }
        }
        Ok(table)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.variants.is_empty() {
            bail!("At least one variant must be configured");
        }

        let aliases = self.alias_table()?;

        if !aliases.contains_key(&self.inference.default_variant) {
            bail!("Default variant '{}' is not configured", self.inference.default_variant);
        }
        for name in &self.inference.preload {
            if !aliases.contains_key(name) {
                bail!("Preload variant '{}' is not configured", name);
            }
        }

        for (id, variant) in &self.variants {
            let det = &variant.detection;
            for (field, value) in [
                ("detection.thresh", det.thresh),
                ("detection.box_thresh", det.box_thresh),
                ("recognition.drop_score", variant.recognition.drop_score),
                ("orientation.cls_thresh", variant.orientation.cls_thresh),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    bail!("Variant '{}': {} must be within [0, 1], got {}", id, field, value);
                }
            }
            if det.unclip_ratio <= 0.0 {
                bail!("Variant '{}': detection.unclip_ratio must be positive", id);
            }
            if det.limit_side_len < 32 {
                bail!("Variant '{}': detection.limit_side_len must be at least 32", id);
            }
            if variant.recognition.image_height == 0 || variant.recognition.batch_size == 0 {
                bail!("Variant '{}': recognition height and batch size must be non-zero", id);
            }
            if variant.orientation.batch_size == 0 {
                bail!("Variant '{}': orientation.batch_size must be non-zero", id);
            }
        }

        Ok(())
    }
}

fn default_variants() -> BTreeMap<String, VariantConfig> {
    let mut variants = BTreeMap::new();

    // Classic PP-OCR detection + recognition with line angle classification.
    variants.insert(
        "standard".to_string(),
        VariantConfig {
            aliases: vec!["ocr".to_string()],
            models: VariantModels {
                detection: PathBuf::from("models/standard/det.onnx"),
                recognition: PathBuf::from("models/standard/rec.onnx"),
                dictionary: PathBuf::from("models/standard/en_dict.txt"),
                textline_orientation: Some(PathBuf::from("models/standard/cls.onnx")),
                doc_orientation: None,
                doc_unwarping: None,
            },
            detection: DetectionParams {
                thresh: 0.3,
                box_thresh: 0.3,
                unclip_ratio: 1.5,
                limit_side_len: 1280,
                max_candidates: 1000,
                use_dilation: true,
                score_mode: ScoreMode::Slow,
            },
            recognition: RecognitionParams {
                image_height: 48,
                image_width: 320,
                batch_size: 6,
                use_space_char: true,
                drop_score: 0.5,
            },
            orientation: OrientationParams::default(),
        },
    );

    // PP-OCRv5 server models with document correction, tuned for latency.
    variants.insert(
        "high-accuracy".to_string(),
        VariantConfig {
            aliases: vec!["ocr2".to_string()],
            models: VariantModels {
                detection: PathBuf::from("models/high-accuracy/PP-OCRv5_server_det.onnx"),
                recognition: PathBuf::from("models/high-accuracy/PP-OCRv5_server_rec.onnx"),
                dictionary: PathBuf::from("models/high-accuracy/ppocrv5_dict.txt"),
                textline_orientation: Some(PathBuf::from(
                    "models/high-accuracy/PP-LCNet_x1_0_textline_ori.onnx",
                )),
                doc_orientation: Some(PathBuf::from(
                    "models/high-accuracy/PP-LCNet_x1_0_doc_ori.onnx",
                )),
                doc_unwarping: Some(PathBuf::from("models/high-accuracy/UVDoc.onnx")),
            },
            detection: DetectionParams {
                thresh: 0.3,
                box_thresh: 0.1,
                unclip_ratio: 1.8,
                limit_side_len: 2560,
                max_candidates: 1000,
                use_dilation: true,
                score_mode: ScoreMode::Slow,
            },
            recognition: RecognitionParams {
                image_height: 96,
                image_width: 960,
                batch_size: 1,
                use_space_char: true,
                drop_score: 0.5,
            },
            orientation: OrientationParams {
                use_angle_cls: true,
                use_textline_orientation: true,
                use_doc_orientation: true,
                use_doc_unwarping: true,
                cls_thresh: 0.9,
                batch_size: 1,
            },
        },
    );

    variants
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            inference: InferenceConfig::default(),
            variants: default_variants(),
        }
    }
}
