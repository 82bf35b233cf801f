//! Configuration management for the ensemble inference job

use anyhow::{ensure, Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Channel order of decoded images before canonicalization
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// Decoder output is already RGB - no conversion
    #[default]
    Rgb,
    /// Decoder output is treated as BGR - red and blue planes are swapped
    Bgr,
}

/// Memory layout of the batched input tensor expected by the models
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// [batch, height, width, channels] - Keras exports
    #[default]
    Nhwc,
    /// [batch, channels, height, width]
    Nchw,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    #[serde(default)]
    pub tta: TtaConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Test data location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding `{id}_left.jpg` / `{id}_right.jpg`
    pub images_dir: PathBuf,
    /// CSV listing patient identifiers
    pub ids_csv: PathBuf,
    /// Header name of the identifier column
    pub id_column: String,
    /// File name suffix of left eye images
    pub left_suffix: String,
    /// File name suffix of right eye images
    pub right_suffix: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("extra_data/odir/ODIR-5K_Testing_Images"),
            ids_csv: PathBuf::from("extra_data/odir/XYZ_ODIR.csv"),
            id_column: "ID".to_string(),
            left_suffix: "_left.jpg".to_string(),
            right_suffix: "_right.jpg".to_string(),
        }
    }
}

/// One pretrained model taking part in the ensemble
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    /// Model name used in logs and the run manifest
    pub name: String,
    /// ONNX graph file
    pub path: PathBuf,
    /// External weights blob, if the graph does not embed its initializers
    #[serde(default)]
    pub weights: Option<PathBuf>,
    /// Ensemble weight applied to the side-combined matrix
    pub weight: f32,
    /// File name of the side-combined score dump
    pub output: String,
}

impl ModelEntry {
    fn new(name: &str, dir: &str, weight: f32) -> Self {
        Self {
            name: name.to_string(),
            path: PathBuf::from(format!("saved_models/{dir}/{name}.onnx")),
            weights: None,
            weight,
            output: format!("{name}.csv"),
        }
    }
}

/// ML models configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Input tensor layout shared by all models
    #[serde(default)]
    pub input_layout: InputLayout,
    /// Ensemble members, in combination order
    #[serde(default = "default_model_entries")]
    pub entries: Vec<ModelEntry>,
}

fn default_onnx_threads() -> usize {
    1
}

fn default_model_entries() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("exp_3", "exp_3", 0.8),
        ModelEntry::new("exp_5", "exp_5", 0.9),
        ModelEntry::new("exp_11", "exp_11", 0.7),
    ]
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            onnx_threads: default_onnx_threads(),
            input_layout: InputLayout::Nhwc,
            entries: default_model_entries(),
        }
    }
}

/// Decode-time resize applied by the image loader
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct LoadSize {
    pub width: u32,
    pub height: u32,
}

/// Deterministic preprocessing constants
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Side length of the normalized square image
    pub image_size: u32,
    /// Grayscale intensity a pixel must exceed to count as foreground
    pub crop_tolerance: u8,
    /// Sigma of the contrast-enhancement blur
    pub blur_sigma: f32,
    /// Gain of the image/blur blend (applied as +gain and -gain)
    pub contrast_gain: f32,
    /// Additive bias of the blend
    pub contrast_bias: f32,
    /// Factor applied to intensities after normalization
    pub rescale: f32,
    /// Channel order of decoded images
    pub source_channel_order: ChannelOrder,
    /// Nearest-neighbour resize applied when an image is read from disk
    pub load_size: Option<LoadSize>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: 512,
            crop_tolerance: 7,
            blur_sigma: 10.0,
            contrast_gain: 4.0,
            contrast_bias: 128.0,
            rescale: 1.0 / 128.0,
            source_channel_order: ChannelOrder::Rgb,
            load_size: Some(LoadSize {
                width: 512,
                height: 512,
            }),
        }
    }
}

/// Random geometric augmentation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Rotation angles are drawn from [0, rotation_range) degrees
    pub rotation_range: f32,
    /// Probability of a horizontal flip
    pub horizontal_flip: f64,
    /// Probability of a vertical flip
    pub vertical_flip: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 360.0,
            horizontal_flip: 0.5,
            vertical_flip: 0.5,
        }
    }
}

/// Test-time augmentation protocol
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtaConfig {
    /// Augmentation rounds averaged per model and side
    pub rounds: usize,
    /// Run seed every round generator is derived from
    pub seed: u64,
    /// Images per model call
    pub batch_size: usize,
    /// Weight of the left eye matrix in the side combination
    pub left_weight: f32,
    /// Weight of the right eye matrix in the side combination
    pub right_weight: f32,
}

impl Default for TtaConfig {
    fn default() -> Self {
        Self {
            rounds: 10,
            seed: 123456,
            batch_size: 3,
            left_weight: 0.5,
            right_weight: 0.5,
        }
    }
}

/// Output artifacts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory every artifact is written to
    pub dir: PathBuf,
    /// Final submission file name
    pub submission: String,
    /// Run manifest file name
    pub manifest: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            submission: "Andy_ODIRdr_exp_100".to_string(),
            manifest: "run_manifest.json".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.models.entries.is_empty(), "no models configured");
        ensure!(self.tta.rounds >= 1, "tta.rounds must be at least 1");
        ensure!(self.tta.batch_size >= 1, "tta.batch_size must be at least 1");
        ensure!(
            self.preprocess.image_size >= 1,
            "preprocess.image_size must be at least 1"
        );
        ensure!(
            self.preprocess.blur_sigma.is_finite() && self.preprocess.blur_sigma > 0.0,
            "preprocess.blur_sigma must be a positive number, got {}",
            self.preprocess.blur_sigma
        );
        ensure!(
            self.augmentation.rotation_range.is_finite() && self.augmentation.rotation_range >= 0.0,
            "augmentation.rotation_range must be finite and non-negative, got {}",
            self.augmentation.rotation_range
        );
        for (key, p) in [
            ("augmentation.horizontal_flip", self.augmentation.horizontal_flip),
            ("augmentation.vertical_flip", self.augmentation.vertical_flip),
        ] {
            ensure!((0.0..=1.0).contains(&p), "{key} must lie in [0, 1], got {p}");
        }
        Ok(())
    }

    /// Full path of an artifact inside the output directory
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output.dir.join(file_name)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            models: ModelsConfig::default(),
            preprocess: PreprocessConfig::default(),
            augmentation: AugmentationConfig::default(),
            tta: TtaConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.tta.seed, 123456);
        assert_eq!(config.tta.rounds, 10);
        assert_eq!(config.preprocess.image_size, 512);
        assert_eq!(config.preprocess.crop_tolerance, 7);
        assert_eq!(config.models.input_layout, InputLayout::Nhwc);
        assert_eq!(config.output.submission, "Andy_ODIRdr_exp_100");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_model_weights() {
        let entries = default_model_entries();
        let weights: Vec<f32> = entries.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![0.8, 0.9, 0.7]);
        assert_eq!(entries[1].output, "exp_5.csv");
    }

    #[test]
    fn test_validate_rejects_zero_rounds() {
        let mut config = AppConfig::default();
        config.tta.rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_blur_sigma() {
        for sigma in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let mut config = AppConfig::default();
            config.preprocess.blur_sigma = sigma;
            assert!(config.validate().is_err(), "sigma {sigma} accepted");
        }
    }

    #[test]
    fn test_validate_rejects_bad_rotation_range() {
        for range in [-10.0, f32::NAN, f32::INFINITY] {
            let mut config = AppConfig::default();
            config.augmentation.rotation_range = range;
            assert!(config.validate().is_err(), "rotation range {range} accepted");
        }

        let mut config = AppConfig::default();
        config.augmentation.rotation_range = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[tta]
rounds = 2
seed = 7

[preprocess]
source_channel_order = "bgr"

[[models.entries]]
name = "only"
path = "only.onnx"
weight = 1.5
output = "only.csv"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.tta.rounds, 2);
        assert_eq!(config.tta.seed, 7);
        assert_eq!(config.tta.batch_size, 3);
        assert_eq!(config.preprocess.source_channel_order, ChannelOrder::Bgr);
        assert_eq!(config.models.entries.len(), 1);
        assert_eq!(config.models.entries[0].weight, 1.5);
        assert_eq!(config.logging.level, "info");
    }
}
