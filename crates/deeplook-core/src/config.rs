//! Process configuration: encoder model, alignment preset, filters and batching.
//!
//! Loaded from TOML (every field optional) and then from `DEEPLOOK_*`
//! environment variables. Out-of-range values are clamped rather than rejected.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of assets processed concurrently per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;
const DEFAULT_FETCH_IMAGE_SIZE: f64 = 500.0;
const DEFAULT_MINIMUM_FACE_AREA: f64 = 4000.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown value {value:?} for {key}")]
    UnknownValue { key: &'static str, value: String },
}

/// Embedding model used to encode face chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceEncoderModel {
    /// FaceNet, 160×160 input.
    #[default]
    Facenet,
    /// Quantized VGGFace2 ResNet-50, 224×224 input.
    VggResnetLite,
    /// Quantized VGGFace2 SE-Net-50, 224×224 input.
    VggSenetLite,
}

impl FaceEncoderModel {
    /// Square chip side the model expects.
    pub fn chip_size(self) -> u32 {
        match self {
            FaceEncoderModel::Facenet => 160,
            FaceEncoderModel::VggResnetLite | FaceEncoderModel::VggSenetLite => 224,
        }
    }

    /// Identifier handed to the encoder collaborator.
    pub fn model_id(self) -> &'static str {
        match self {
            FaceEncoderModel::Facenet => "facenet",
            FaceEncoderModel::VggResnetLite => "vggface2_resnet_lite",
            FaceEncoderModel::VggSenetLite => "vggface2_senet_lite",
        }
    }
}

impl fmt::Display for FaceEncoderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_id())
    }
}

impl FromStr for FaceEncoderModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "facenet" => Ok(Self::Facenet),
            "vgg_resnet_lite" | "vggface2_resnet_lite" => Ok(Self::VggResnetLite),
            "vgg_senet_lite" | "vggface2_senet_lite" => Ok(Self::VggSenetLite),
            _ => Err(ConfigError::UnknownValue {
                key: "face_encoder_model",
                value: s.to_string(),
            }),
        }
    }
}

/// Canonical landmark set the similarity transform is fitted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarksAlignmentAlgorithm {
    /// Inner-face subset of the dlib 68-point mean shape.
    Dlib32,
    /// dlib 5-point layout (eye corners and nose).
    Dlib5,
    /// SphereFace 5-point layout (eye centres, nose, mouth corners).
    #[default]
    SphereFace5,
}

impl FromStr for LandmarksAlignmentAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dlib32" => Ok(Self::Dlib32),
            "dlib5" => Ok(Self::Dlib5),
            "sphere_face5" | "sphereface5" => Ok(Self::SphereFace5),
            _ => Err(ConfigError::UnknownValue {
                key: "landmarks_alignment_algorithm",
                value: s.to_string(),
            }),
        }
    }
}

/// Minimum capture quality a face needs to stay in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFilter {
    None,
    #[default]
    Low,
    Medium,
    High,
    Extreme,
}

impl QualityFilter {
    pub fn value(self) -> f32 {
        match self {
            QualityFilter::None => 0.0,
            QualityFilter::Low => 0.1,
            QualityFilter::Medium => 0.25,
            QualityFilter::High => 0.35,
            QualityFilter::Extreme => 0.4,
        }
    }
}

impl FromStr for QualityFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "extreme" => Ok(Self::Extreme),
            _ => Err(ConfigError::UnknownValue {
                key: "minimum_quality_filter",
                value: s.to_string(),
            }),
        }
    }
}

/// Per-run processing configuration, shared read-only by every asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfiguration {
    /// Longest side, in pixels, images are downsampled to when fetched.
    pub fetch_image_size: f64,
    pub landmarks_alignment_algorithm: LandmarksAlignmentAlgorithm,
    pub face_encoder_model: FaceEncoderModel,
    /// Faces smaller than this many pixels are dropped before alignment.
    pub minimum_face_area: f64,
    /// Chip padding as a fraction of the face, clamped to [-1, 1].
    pub face_chip_padding: f64,
    pub minimum_quality_filter: QualityFilter,
    /// Assets per scheduler chunk.
    pub chunk_size: usize,
}

impl Default for ProcessConfiguration {
    fn default() -> Self {
        Self {
            fetch_image_size: DEFAULT_FETCH_IMAGE_SIZE,
            landmarks_alignment_algorithm: LandmarksAlignmentAlgorithm::default(),
            face_encoder_model: FaceEncoderModel::default(),
            minimum_face_area: DEFAULT_MINIMUM_FACE_AREA,
            face_chip_padding: 0.0,
            minimum_quality_filter: QualityFilter::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ProcessConfiguration {
    /// Parse TOML; missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        Ok(config.normalized())
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Apply `DEEPLOOK_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        Self {
            fetch_image_size: env_f64("DEEPLOOK_FETCH_IMAGE_SIZE", self.fetch_image_size),
            landmarks_alignment_algorithm: env_parse(
                "DEEPLOOK_ALIGNMENT",
                self.landmarks_alignment_algorithm,
            ),
            face_encoder_model: env_parse("DEEPLOOK_ENCODER_MODEL", self.face_encoder_model),
            minimum_face_area: env_f64("DEEPLOOK_MIN_FACE_AREA", self.minimum_face_area),
            face_chip_padding: env_f64("DEEPLOOK_CHIP_PADDING", self.face_chip_padding),
            minimum_quality_filter: env_parse(
                "DEEPLOOK_QUALITY_FILTER",
                self.minimum_quality_filter,
            ),
            chunk_size: env_usize("DEEPLOOK_CHUNK_SIZE", self.chunk_size),
        }
        .normalized()
    }

    /// Clamp every field into its valid range.
    pub fn normalized(self) -> Self {
        Self {
            fetch_image_size: non_negative(self.fetch_image_size),
            minimum_face_area: non_negative(self.minimum_face_area),
            face_chip_padding: if self.face_chip_padding.is_nan() {
                0.0
            } else {
                self.face_chip_padding.clamp(-1.0, 1.0)
            },
            chunk_size: self.chunk_size.max(1),
            ..self
        }
    }

    /// Chip side length implied by the encoder model.
    pub fn face_chip_size(&self) -> u32 {
        self.face_encoder_model.chip_size()
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.max(0.0)
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_number(key, default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_number(key, default)
}

fn env_number<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|e: T::Err| {
            tracing::warn!(key, error = %e, "ignoring environment override");
            default
        }),
        Err(_) => default,
    }
}

fn env_parse<T: FromStr<Err = ConfigError>>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "ignoring environment override");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ProcessConfiguration::default();
        assert_eq!(c.face_encoder_model, FaceEncoderModel::Facenet);
        assert_eq!(c.landmarks_alignment_algorithm, LandmarksAlignmentAlgorithm::SphereFace5);
        assert_eq!(c.minimum_quality_filter, QualityFilter::Low);
        assert_eq!(c.face_chip_size(), 160);
        assert_eq!(c.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(c.minimum_face_area, 4000.0);
    }

    #[test]
    fn test_quality_filter_table() {
        assert_eq!(QualityFilter::None.value(), 0.0);
        assert_eq!(QualityFilter::Low.value(), 0.1);
        assert_eq!(QualityFilter::Medium.value(), 0.25);
        assert_eq!(QualityFilter::High.value(), 0.35);
        assert_eq!(QualityFilter::Extreme.value(), 0.4);
    }

    #[test]
    fn test_encoder_chip_sizes() {
        assert_eq!(FaceEncoderModel::Facenet.chip_size(), 160);
        assert_eq!(FaceEncoderModel::VggResnetLite.chip_size(), 224);
        assert_eq!(FaceEncoderModel::VggSenetLite.chip_size(), 224);
    }

    #[test]
    fn test_toml_partial_and_clamped() {
        let c = ProcessConfiguration::from_toml_str(
            r#"
            face_encoder_model = "vgg_senet_lite"
            landmarks_alignment_algorithm = "dlib5"
            face_chip_padding = 3.5
            minimum_face_area = -10.0
            minimum_quality_filter = "high"
            chunk_size = 0
            "#,
        )
        .unwrap();
        assert_eq!(c.face_encoder_model, FaceEncoderModel::VggSenetLite);
        assert_eq!(c.landmarks_alignment_algorithm, LandmarksAlignmentAlgorithm::Dlib5);
        assert_eq!(c.face_chip_padding, 1.0);
        assert_eq!(c.minimum_face_area, 0.0);
        assert_eq!(c.minimum_quality_filter, QualityFilter::High);
        assert_eq!(c.chunk_size, 1);
        assert_eq!(c.fetch_image_size, 500.0);
    }

    #[test]
    fn test_malformed_numeric_env_values_fall_back() {
        std::env::set_var("DEEPLOOK_TEST_BAD_FLOAT", "wide");
        std::env::set_var("DEEPLOOK_TEST_BAD_COUNT", "-3");
        std::env::set_var("DEEPLOOK_TEST_GOOD_COUNT", "12");
        assert_eq!(env_f64("DEEPLOOK_TEST_BAD_FLOAT", 0.25), 0.25);
        assert_eq!(env_usize("DEEPLOOK_TEST_BAD_COUNT", 10), 10);
        assert_eq!(env_usize("DEEPLOOK_TEST_GOOD_COUNT", 10), 12);
        assert_eq!(env_f64("DEEPLOOK_TEST_UNSET_FLOAT", 1.5), 1.5);
    }

    #[test]
    fn test_toml_rejects_unknown_enum() {
        let err = ProcessConfiguration::from_toml_str(r#"face_encoder_model = "resnet9000""#);
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_negative_padding_clamped() {
        let c = ProcessConfiguration {
            face_chip_padding: -4.0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(c.face_chip_padding, -1.0);
    }

    #[test]
    fn test_from_str_variants() {
        assert_eq!("SphereFace5".parse::<LandmarksAlignmentAlgorithm>().unwrap(), LandmarksAlignmentAlgorithm::SphereFace5);
        assert_eq!("extreme".parse::<QualityFilter>().unwrap(), QualityFilter::Extreme);
        assert!("loud".parse::<QualityFilter>().is_err());
        assert_eq!("facenet".parse::<FaceEncoderModel>().unwrap(), FaceEncoderModel::Facenet);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ProcessConfiguration::load(Path::new("/nonexistent/deeplook.toml"));
        assert!(matches!(err, Err(ConfigError::Io { .. })));
    }
}
