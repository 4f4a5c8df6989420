use std::hash::{Hash, Hasher};
use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::ProcessConfiguration;
use crate::linalg::{self, LinalgError};

/// Identifier given to faces from the source image in verify/find runs.
pub const SOURCE_IDENTIFIER: &str = "lhs";
/// Identifier given to faces from target images in verify runs.
pub const TARGET_IDENTIFIER: &str = "rhs";

/// Number of points in the detector's full landmark constellation.
pub const LANDMARK_POINT_COUNT: usize = 76;

/// A 2D point in image pixel coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Bounding box normalized to [0, 1] relative to image width/height, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    /// Area in pixels once scaled to an image of the given size.
    pub fn pixel_area(&self, image_width: u32, image_height: u32) -> f64 {
        (self.width * image_width as f64) * (self.height * image_height as f64)
    }
}

/// Detector output for one face.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bounding_box: NormalizedRect,
    /// Full landmark constellation in image pixels ([`LANDMARK_POINT_COUNT`] points).
    pub landmarks: Option<Vec<Point>>,
    /// Head yaw in radians.
    pub yaw: Option<f64>,
    /// Capture quality in [0, 1] from the quality detector.
    pub capture_quality: Option<f32>,
}

/// Facial expression classes, in the order the expression model scores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
    #[default]
    None,
}

impl Emotion {
    /// Scored classes; `None` is never produced by the model.
    pub const CLASSES: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    /// Pick the highest-scoring class. Empty or all-NaN scores give `None`.
    pub fn from_scores(scores: &[f32]) -> Emotion {
        scores
            .iter()
            .take(Self::CLASSES.len())
            .enumerate()
            .filter(|(_, s)| !s.is_nan())
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| Self::CLASSES[i])
            .unwrap_or(Emotion::None)
    }
}

/// One detected face, enriched stage by stage.
///
/// Faces are values: every stage builds a new `Face` through the `with_*`
/// methods instead of mutating one shared between tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    /// Origin asset id, or [`SOURCE_IDENTIFIER`]/[`TARGET_IDENTIFIER`] for in-memory images.
    pub local_identifier: String,
    /// Aligned face chip. `None` until the crop stage runs.
    #[serde(skip)]
    pub cropped_image: Option<RgbImage>,
    pub observation: FaceObservation,
    pub quality: f32,
    /// Roll in radians applied during alignment.
    pub roll: f64,
    /// Unit-norm embedding. Empty until the encoding stage runs.
    pub encoding: Vec<f64>,
    pub emotion: Emotion,
}

impl Face {
    pub fn new(local_identifier: impl Into<String>, observation: FaceObservation) -> Self {
        Self {
            local_identifier: local_identifier.into(),
            cropped_image: None,
            observation,
            quality: 0.0,
            roll: 0.0,
            encoding: Vec::new(),
            emotion: Emotion::None,
        }
    }

    pub fn with_observation(self, observation: FaceObservation) -> Self {
        Self { observation, ..self }
    }

    pub fn with_quality(self, quality: f32) -> Self {
        Self { quality, ..self }
    }

    pub fn with_chip(self, chip: RgbImage, roll: f64) -> Self {
        Self {
            cropped_image: Some(chip),
            roll,
            ..self
        }
    }

    pub fn with_encoding(self, encoding: Vec<f64>) -> Self {
        Self { encoding, ..self }
    }

    pub fn with_emotion(self, emotion: Emotion) -> Self {
        Self { emotion, ..self }
    }

    /// Euclidean distance between the two faces' encodings.
    pub fn distance(&self, other: &Face) -> Result<f64, LinalgError> {
        linalg::distance(&self.encoding, &other.encoding)
    }

    pub fn is_source(&self) -> bool {
        self.local_identifier == SOURCE_IDENTIFIER
    }
}

/// A classified object or scene tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub identifier: String,
    pub confidence: f32,
    pub location: NormalizedRect,
}

/// One image moving through the pipeline, with everything found so far.
#[derive(Debug, Clone)]
pub struct ProcessAsset {
    pub identifier: String,
    /// Decoded image. `None` until fetched; shared read-only between stages.
    pub image: Option<Arc<RgbImage>>,
    pub tags: Vec<DetectedObject>,
    pub bounding_boxes: Vec<NormalizedRect>,
    pub faces: Vec<Face>,
}

impl ProcessAsset {
    /// An asset that still has to be fetched by identifier.
    pub fn pending(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            image: None,
            tags: Vec::new(),
            bounding_boxes: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// An asset backed by an in-memory image.
    pub fn from_image(identifier: impl Into<String>, image: RgbImage) -> Self {
        Self {
            image: Some(Arc::new(image)),
            ..Self::pending(identifier)
        }
    }

    pub fn with_image(self, image: Arc<RgbImage>) -> Self {
        Self {
            image: Some(image),
            ..self
        }
    }

    pub fn with_tags(self, tags: Vec<DetectedObject>) -> Self {
        Self { tags, ..self }
    }

    pub fn with_bounding_boxes(self, bounding_boxes: Vec<NormalizedRect>) -> Self {
        Self {
            bounding_boxes,
            ..self
        }
    }

    pub fn with_faces(self, faces: Vec<Face>) -> Self {
        Self { faces, ..self }
    }

    /// Whether a non-empty image is attached.
    pub fn has_image(&self) -> bool {
        self.image
            .as_ref()
            .is_some_and(|img| img.width() > 0 && img.height() > 0)
    }
}

/// An asset paired with the configuration it is processed under.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    pub asset: ProcessAsset,
    pub configuration: Arc<ProcessConfiguration>,
}

impl ProcessInput {
    pub fn new(asset: ProcessAsset, configuration: Arc<ProcessConfiguration>) -> Self {
        Self {
            asset,
            configuration,
        }
    }

    pub fn with_asset(self, asset: ProcessAsset) -> Self {
        Self { asset, ..self }
    }
}

/// Pipeline result for one asset, without the image buffer.
///
/// Equality and hashing use `local_identifier` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub local_identifier: String,
    pub tags: Vec<DetectedObject>,
    pub bounding_boxes: Vec<NormalizedRect>,
    pub faces: Vec<Face>,
}

impl From<ProcessAsset> for ProcessOutput {
    fn from(asset: ProcessAsset) -> Self {
        Self {
            local_identifier: asset.identifier,
            tags: asset.tags,
            bounding_boxes: asset.bounding_boxes,
            faces: asset.faces,
        }
    }
}

impl PartialEq for ProcessOutput {
    fn eq(&self, other: &Self) -> bool {
        self.local_identifier == other.local_identifier
    }
}

impl Eq for ProcessOutput {}

impl Hash for ProcessOutput {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_identifier.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn face_with(id: &str, encoding: Vec<f64>) -> Face {
        Face::new(id, FaceObservation::default()).with_encoding(encoding)
    }

    #[test]
    fn test_face_defaults() {
        let face = Face::new("asset-1", FaceObservation::default());
        assert_eq!(face.quality, 0.0);
        assert_eq!(face.roll, 0.0);
        assert!(face.encoding.is_empty());
        assert!(face.cropped_image.is_none());
        assert_eq!(face.emotion, Emotion::None);
    }

    #[test]
    fn test_face_with_builders_preserve_other_fields() {
        let face = Face::new("a", FaceObservation::default())
            .with_quality(0.7)
            .with_encoding(vec![1.0, 0.0])
            .with_emotion(Emotion::Happy)
            .with_chip(RgbImage::new(4, 4), 0.25);
        assert_eq!(face.local_identifier, "a");
        assert_eq!(face.quality, 0.7);
        assert_eq!(face.encoding, vec![1.0, 0.0]);
        assert_eq!(face.emotion, Emotion::Happy);
        assert_eq!(face.roll, 0.25);
        assert_eq!(face.cropped_image.as_ref().map(|c| c.width()), Some(4));
    }

    #[test]
    fn test_face_distance() {
        let a = face_with("a", vec![1.0, 0.0]);
        let b = face_with("b", vec![0.0, 1.0]);
        assert!((a.distance(&b).unwrap() - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_face_distance_without_encoding_is_error() {
        let a = face_with("a", vec![]);
        let b = face_with("b", vec![0.0, 1.0]);
        assert_eq!(a.distance(&b), Err(LinalgError::Empty));
    }

    #[test]
    fn test_emotion_from_scores() {
        assert_eq!(
            Emotion::from_scores(&[0.1, 0.0, 0.0, 0.8, 0.05, 0.0, 0.05]),
            Emotion::Happy
        );
        assert_eq!(Emotion::from_scores(&[]), Emotion::None);
        assert_eq!(Emotion::from_scores(&[f32::NAN, 0.2]), Emotion::Disgust);
    }

    #[test]
    fn test_pixel_area() {
        let rect = NormalizedRect { x: 0.1, y: 0.1, width: 0.5, height: 0.25 };
        assert!((rect.pixel_area(400, 200) - 200.0 * 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_asset_has_image() {
        assert!(!ProcessAsset::pending("x").has_image());
        assert!(!ProcessAsset::from_image("x", RgbImage::new(0, 0)).has_image());
        assert!(ProcessAsset::from_image("x", RgbImage::new(2, 2)).has_image());
    }

    #[test]
    fn test_process_output_drops_image_and_hashes_by_identifier() {
        let asset = ProcessAsset::from_image("id-1", RgbImage::new(2, 2))
            .with_faces(vec![face_with("id-1", vec![1.0])]);
        let out = ProcessOutput::from(asset);
        assert_eq!(out.local_identifier, "id-1");
        assert_eq!(out.faces.len(), 1);

        let other = ProcessOutput {
            local_identifier: "id-1".into(),
            tags: vec![],
            bounding_boxes: vec![],
            faces: vec![],
        };
        let mut set = HashSet::new();
        set.insert(out);
        assert!(!set.insert(other));
    }
}
