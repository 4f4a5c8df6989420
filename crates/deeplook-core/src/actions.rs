//! Per-asset pipeline stages over the vision collaborators.
//!
//! Every stage takes a [`ProcessInput`] by value and returns a new one. Faces
//! that cannot be used (too small, turned away, unalignable, no chip) are
//! dropped from the asset; collaborator failures fail the asset.

use std::sync::Arc;

use image::RgbImage;

use crate::alignment;
use crate::linalg;
use crate::pipeline::stage::{then, Stage};
use crate::pipeline::PipelineError;
use crate::types::{Emotion, Face, FaceObservation, ProcessInput, ProcessOutput};
use crate::vision::{
    EmotionClassifier, FaceDetector, FaceEncoder, ImageFetcher, ObjectClassifier, VisionContext,
    VisionError,
};

/// Faces turned further than this (radians) are not aligned.
const MAX_ABS_YAW: f64 = 1.5;

fn image_of(input: &ProcessInput) -> Result<Arc<RgbImage>, PipelineError> {
    input
        .asset
        .image
        .as_ref()
        .filter(|_| input.asset.has_image())
        .cloned()
        .ok_or_else(|| PipelineError::MissingImage(input.asset.identifier.clone()))
}

fn detection_error(input: &ProcessInput) -> impl FnOnce(VisionError) -> PipelineError + '_ {
    move |source| PipelineError::Detection {
        asset: input.asset.identifier.clone(),
        source,
    }
}

/// Whether a landmark observation is worth aligning.
pub fn has_minimum_landmark_requirement(
    observation: &FaceObservation,
    input: &ProcessInput,
    image: &RgbImage,
) -> bool {
    let yaw = observation.yaw.unwrap_or(0.0);
    if !(-MAX_ABS_YAW..=MAX_ABS_YAW).contains(&yaw) {
        return false;
    }
    let area = observation
        .bounding_box
        .pixel_area(image.width(), image.height());
    area >= input.configuration.minimum_face_area
}

/// Loads the asset image unless one is already attached.
pub struct FetchAsset {
    fetcher: Arc<dyn ImageFetcher>,
}

impl FetchAsset {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }
}

impl Stage<ProcessInput> for FetchAsset {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        if input.asset.has_image() {
            return Ok(input);
        }
        let image = self
            .fetcher
            .fetch(&input.asset.identifier, input.configuration.fetch_image_size)
            .map_err(|source| PipelineError::Fetch {
                asset: input.asset.identifier.clone(),
                source,
            })?;
        let asset = input.asset.clone().with_image(Arc::new(image));
        Ok(input.with_asset(asset))
    }
}

/// Face bounding boxes. Clears any faces found so far.
pub struct FaceRectangles {
    detector: Arc<dyn FaceDetector>,
}

impl FaceRectangles {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }
}

impl Stage<ProcessInput> for FaceRectangles {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        let image = image_of(&input)?;
        let observations = self
            .detector
            .detect_face_rectangles(&image)
            .map_err(detection_error(&input))?;
        let boxes = observations.iter().map(|o| o.bounding_box).collect();
        let asset = input
            .asset
            .clone()
            .with_bounding_boxes(boxes)
            .with_faces(Vec::new());
        Ok(input.with_asset(asset))
    }
}

/// Landmark constellations, keeping only faces fit for alignment.
///
/// When the detector answers for exactly the faces already on the asset the
/// new observations are merged into them; otherwise the faces are rebuilt.
pub struct FaceLandmarks {
    detector: Arc<dyn FaceDetector>,
}

impl FaceLandmarks {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }
}

impl Stage<ProcessInput> for FaceLandmarks {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        let image = image_of(&input)?;
        let prior: Vec<FaceObservation> =
            input.asset.faces.iter().map(|f| f.observation.clone()).collect();
        let observations = self
            .detector
            .detect_face_landmarks(&image, &prior)
            .map_err(detection_error(&input))?;

        let boxes = observations.iter().map(|o| o.bounding_box).collect();
        let keep = |o: &FaceObservation| has_minimum_landmark_requirement(o, &input, &image);
        let faces: Vec<Face> = if observations.len() == input.asset.faces.len() {
            input
                .asset
                .faces
                .iter()
                .cloned()
                .zip(observations)
                .filter(|(_, o)| keep(o))
                .map(|(face, o)| face.with_observation(o))
                .collect()
        } else {
            observations
                .into_iter()
                .filter(|o| keep(o))
                .map(|o| Face::new(input.asset.identifier.clone(), o))
                .collect()
        };

        let asset = input
            .asset
            .clone()
            .with_bounding_boxes(boxes)
            .with_faces(faces);
        Ok(input.with_asset(asset))
    }
}

/// Capture quality, dropping faces under the configured filter.
///
/// A no-op when the filter is `none`.
pub struct FaceQuality {
    detector: Arc<dyn FaceDetector>,
}

impl FaceQuality {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }
}

impl Stage<ProcessInput> for FaceQuality {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        let filter = input.configuration.minimum_quality_filter;
        if filter == crate::config::QualityFilter::None {
            return Ok(input);
        }
        let image = image_of(&input)?;
        let prior: Vec<FaceObservation> =
            input.asset.faces.iter().map(|f| f.observation.clone()).collect();
        let observations = self
            .detector
            .detect_face_quality(&image, &prior)
            .map_err(detection_error(&input))?;

        let threshold = filter.value();
        let quality = |o: &FaceObservation| o.capture_quality.unwrap_or(0.0);
        let asset = if observations.len() == input.asset.faces.len() {
            let faces = input
                .asset
                .faces
                .iter()
                .cloned()
                .zip(observations)
                .filter(|(_, o)| quality(o) >= threshold)
                .map(|(face, o)| face.with_quality(quality(&o)))
                .collect();
            input.asset.clone().with_faces(faces)
        } else {
            let boxes = observations.iter().map(|o| o.bounding_box).collect();
            let faces = observations
                .into_iter()
                .filter(|o| quality(o) >= threshold)
                .map(|o| {
                    let q = quality(&o);
                    Face::new(input.asset.identifier.clone(), o).with_quality(q)
                })
                .collect();
            input
                .asset
                .clone()
                .with_bounding_boxes(boxes)
                .with_faces(faces)
        };
        Ok(input.with_asset(asset))
    }
}

/// Aligned face chips. Faces that cannot be aligned are dropped.
pub struct CropAndAlign;

impl Stage<ProcessInput> for CropAndAlign {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        let image = image_of(&input)?;
        let config = &input.configuration;
        let size = config.face_chip_size();

        let faces: Vec<Face> = input
            .asset
            .faces
            .iter()
            .cloned()
            .filter_map(|face| match alignment::face_chip_details(&face.observation, config) {
                Ok(chip) => {
                    let pixels = alignment::extract_chip(&image, &chip, size);
                    Some(face.with_chip(pixels, chip.roll))
                }
                Err(e) => {
                    tracing::debug!(
                        asset = %input.asset.identifier,
                        error = %e,
                        "dropping face that cannot be aligned"
                    );
                    None
                }
            })
            .collect();

        let asset = input.asset.clone().with_faces(faces);
        Ok(input.with_asset(asset))
    }
}

/// Unit-norm embeddings for every face with a chip.
pub struct EncodeFaces {
    encoder: Arc<dyn FaceEncoder>,
}

impl EncodeFaces {
    pub fn new(encoder: Arc<dyn FaceEncoder>) -> Self {
        Self { encoder }
    }
}

impl Stage<ProcessInput> for EncodeFaces {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        let model = input.configuration.face_encoder_model;
        let asset_id = &input.asset.identifier;
        let mut faces = Vec::with_capacity(input.asset.faces.len());
        for face in input.asset.faces.iter().cloned() {
            let Some(chip) = face.cropped_image.as_ref() else {
                continue;
            };
            let raw = self.encoder.encode(chip, model).map_err(|e| match e {
                VisionError::ModelUnavailable(_) => PipelineError::ModelUnavailable { model, source: e },
                source => PipelineError::Vision {
                    asset: asset_id.clone(),
                    source,
                },
            })?;
            let encoding = linalg::normalize_l2(&raw).map_err(|source| PipelineError::Encoding {
                asset: asset_id.clone(),
                source,
            })?;
            faces.push(face.with_encoding(encoding));
        }
        let asset = input.asset.clone().with_faces(faces);
        Ok(input.with_asset(asset))
    }

    fn requires_encoder(&self) -> bool {
        true
    }
}

/// Expression class for every face with a chip.
pub struct FaceEmotion {
    classifier: Arc<dyn EmotionClassifier>,
}

impl FaceEmotion {
    pub fn new(classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self { classifier }
    }
}

impl Stage<ProcessInput> for FaceEmotion {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        let mut faces = Vec::with_capacity(input.asset.faces.len());
        for face in input.asset.faces.iter().cloned() {
            let Some(chip) = face.cropped_image.as_ref() else {
                continue;
            };
            let scores = self
                .classifier
                .classify(chip)
                .map_err(|source| PipelineError::Vision {
                    asset: input.asset.identifier.clone(),
                    source,
                })?;
            faces.push(face.with_emotion(Emotion::from_scores(&scores)));
        }
        let asset = input.asset.clone().with_faces(faces);
        Ok(input.with_asset(asset))
    }
}

/// Object and scene tags for the whole image.
pub struct TagImage {
    classifier: Arc<dyn ObjectClassifier>,
}

impl TagImage {
    pub fn new(classifier: Arc<dyn ObjectClassifier>) -> Self {
        Self { classifier }
    }
}

impl Stage<ProcessInput> for TagImage {
    type Output = ProcessInput;

    fn run(&self, input: ProcessInput) -> Result<ProcessInput, PipelineError> {
        let image = image_of(&input)?;
        let tags = self
            .classifier
            .classify(&image)
            .map_err(|source| PipelineError::Vision {
                asset: input.asset.identifier.clone(),
                source,
            })?;
        let asset = input.asset.clone().with_tags(tags);
        Ok(input.with_asset(asset))
    }
}

/// Drop the image buffer once an asset is done.
pub fn clean(input: ProcessInput) -> Result<ProcessOutput, PipelineError> {
    Ok(ProcessOutput::from(input.asset))
}

/// Landmarks, then aligned chips.
pub fn crop_and_align_faces(
    ctx: &VisionContext,
) -> impl Stage<ProcessInput, Output = ProcessInput> + 'static {
    then(FaceLandmarks::new(Arc::clone(&ctx.detector)), CropAndAlign)
}

/// Quality filter, aligned chips, then embeddings.
pub fn face_encoding(ctx: &VisionContext) -> impl Stage<ProcessInput, Output = ProcessInput> + 'static {
    then(
        FaceQuality::new(Arc::clone(&ctx.detector)),
        then(
            crop_and_align_faces(ctx),
            EncodeFaces::new(Arc::clone(&ctx.encoder)),
        ),
    )
}

/// Aligned chips, then expression classes.
pub fn face_emotion(
    ctx: &VisionContext,
) -> Result<impl Stage<ProcessInput, Output = ProcessInput> + 'static, PipelineError> {
    let classifier = ctx
        .emotion
        .as_ref()
        .ok_or(PipelineError::MissingCollaborator("emotion classifier"))?;
    Ok(then(
        crop_and_align_faces(ctx),
        FaceEmotion::new(Arc::clone(classifier)),
    ))
}

/// Object and scene tags.
pub fn object_tags(ctx: &VisionContext) -> Result<TagImage, PipelineError> {
    let classifier = ctx
        .objects
        .as_ref()
        .ok_or(PipelineError::MissingCollaborator("object classifier"))?;
    Ok(TagImage::new(Arc::clone(classifier)))
}
