//! Vision collaborators: detection, encoding, classification and image fetch.
//!
//! The concrete models live outside this crate. Stages reach them through the
//! traits below, bundled in a [`VisionContext`] that is passed explicitly.

use std::path::PathBuf;
use std::sync::Arc;

use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

use crate::config::FaceEncoderModel;
use crate::types::{DetectedObject, FaceObservation};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VisionError {
    #[error("model {0} is not available")]
    ModelUnavailable(String),
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("vision request failed: {0}")]
    Request(String),
}

/// Face detection over a decoded image.
pub trait FaceDetector: Send + Sync {
    /// Bounding boxes (and yaw, when the detector provides it).
    fn detect_face_rectangles(&self, image: &RgbImage) -> Result<Vec<FaceObservation>, VisionError>;

    /// Landmark constellations for the given faces, or for every face when
    /// `faces` is empty.
    fn detect_face_landmarks(
        &self,
        image: &RgbImage,
        faces: &[FaceObservation],
    ) -> Result<Vec<FaceObservation>, VisionError>;

    /// Capture quality for the given faces, or for every face when `faces`
    /// is empty.
    fn detect_face_quality(
        &self,
        image: &RgbImage,
        faces: &[FaceObservation],
    ) -> Result<Vec<FaceObservation>, VisionError>;
}

/// Face chip → embedding.
pub trait FaceEncoder: Send + Sync {
    /// Load `model` ahead of a run. Fails when the model cannot be used.
    fn prepare(&self, model: FaceEncoderModel) -> Result<(), VisionError>;

    /// Raw (unnormalised) embedding for one aligned chip.
    fn encode(&self, chip: &RgbImage, model: FaceEncoderModel) -> Result<Vec<f64>, VisionError>;
}

/// Face chip → per-class expression scores.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, chip: &RgbImage) -> Result<Vec<f32>, VisionError>;
}

/// Whole image → object and scene tags.
pub trait ObjectClassifier: Send + Sync {
    fn classify(&self, image: &RgbImage) -> Result<Vec<DetectedObject>, VisionError>;
}

/// Asset identifier → decoded image, downsampled to `max_dimension`.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, identifier: &str, max_dimension: f64) -> Result<RgbImage, VisionError>;
}

/// Collaborators shared by every stage of a run.
#[derive(Clone)]
pub struct VisionContext {
    pub detector: Arc<dyn FaceDetector>,
    pub encoder: Arc<dyn FaceEncoder>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub emotion: Option<Arc<dyn EmotionClassifier>>,
    pub objects: Option<Arc<dyn ObjectClassifier>>,
}

impl VisionContext {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        encoder: Arc<dyn FaceEncoder>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            detector,
            encoder,
            fetcher,
            emotion: None,
            objects: None,
        }
    }

    pub fn with_emotion_classifier(self, classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self {
            emotion: Some(classifier),
            ..self
        }
    }

    pub fn with_object_classifier(self, classifier: Arc<dyn ObjectClassifier>) -> Self {
        Self {
            objects: Some(classifier),
            ..self
        }
    }
}

/// Reads images from a directory; identifiers are paths relative to `root`.
#[derive(Debug, Clone)]
pub struct FileImageFetcher {
    root: PathBuf,
}

impl FileImageFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImageFetcher for FileImageFetcher {
    fn fetch(&self, identifier: &str, max_dimension: f64) -> Result<RgbImage, VisionError> {
        let path = self.root.join(identifier);
        if !path.is_file() {
            return Err(VisionError::NotFound(path.display().to_string()));
        }
        let img = image::open(&path).map_err(|e| VisionError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let longest = img.width().max(img.height());
        let img = if max_dimension >= 1.0 && f64::from(longest) > max_dimension {
            let side = max_dimension as u32;
            img.resize(side, side, FilterType::Triangle)
        } else {
            img
        };
        tracing::trace!(
            path = %path.display(),
            width = img.width(),
            height = img.height(),
            "image fetched"
        );
        Ok(img.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("deeplook-vision-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_file_fetcher_downsamples_longest_side() {
        let dir = temp_dir("downsample");
        RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]))
            .save(dir.join("wide.png"))
            .unwrap();

        let fetcher = FileImageFetcher::new(&dir);
        let img = fetcher.fetch("wide.png", 50.0).unwrap();
        assert_eq!(img.dimensions(), (50, 25));

        let full = fetcher.fetch("wide.png", 500.0).unwrap();
        assert_eq!(full.dimensions(), (200, 100));
        assert_eq!(full.get_pixel(0, 0), &Rgb([10, 20, 30]));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_file_fetcher_missing_and_corrupt() {
        let dir = temp_dir("errors");
        std::fs::write(dir.join("broken.png"), b"not an image").unwrap();
        let fetcher = FileImageFetcher::new(&dir);

        assert!(matches!(fetcher.fetch("absent.png", 500.0), Err(VisionError::NotFound(_))));
        assert!(matches!(fetcher.fetch("broken.png", 500.0), Err(VisionError::Decode { .. })));
        std::fs::remove_dir_all(dir).ok();
    }
}
