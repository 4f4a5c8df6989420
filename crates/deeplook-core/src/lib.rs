//! deeplook-core — face grouping and verification engine.
//!
//! Runs batches of images through composable per-asset stages (fetch,
//! quality filter, landmarks, alignment, embedding) on a chunked tokio
//! scheduler, then clusters or verifies the resulting face embeddings.
//! Detection, embedding models and image sources are supplied by the caller
//! through the traits in [`vision`].

pub mod actions;
pub mod alignment;
pub mod cluster;
pub mod config;
pub mod linalg;
pub mod matching;
pub mod pipeline;
pub mod types;
pub mod vision;

pub use cluster::{cluster, ClusterOptions, ClusterType};
pub use config::{FaceEncoderModel, LandmarksAlignmentAlgorithm, ProcessConfiguration, QualityFilter};
pub use matching::{verify, Match};
pub use pipeline::{detect, run_pipeline, BatchReport, ChunkStack, PipelineError};
pub use types::{Face, FaceObservation, ProcessAsset, ProcessInput, ProcessOutput};
pub use vision::VisionContext;
