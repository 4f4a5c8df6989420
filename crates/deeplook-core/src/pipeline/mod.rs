//! Batch processing: stage composition, the chunk stack and the scheduler.

pub mod scheduler;
pub mod stack;
pub mod stage;

use std::sync::Arc;

use thiserror::Error;

use crate::actions::{self, FetchAsset};
use crate::config::FaceEncoderModel;
use crate::linalg::LinalgError;
use crate::types::{ProcessInput, ProcessOutput};
use crate::vision::{VisionContext, VisionError};

pub use scheduler::{run_pipeline, BatchReport, ItemFailure};
pub use stack::{chunked, Chunk, ChunkStack};
pub use stage::{async_stage_fn, lift, stage_fn, then, then_async, AsyncStage, Stage};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no assets to process")]
    EmptyInput,
    #[error("failed to fetch {asset}: {source}")]
    Fetch {
        asset: String,
        #[source]
        source: VisionError,
    },
    #[error("asset {0} has no image")]
    MissingImage(String),
    #[error("face detection failed for {asset}: {source}")]
    Detection {
        asset: String,
        #[source]
        source: VisionError,
    },
    #[error("encoder model {model} unavailable: {source}")]
    ModelUnavailable {
        model: FaceEncoderModel,
        #[source]
        source: VisionError,
    },
    #[error("vision request failed for {asset}: {source}")]
    Vision {
        asset: String,
        #[source]
        source: VisionError,
    },
    #[error("unusable face encoding for {asset}: {source}")]
    Encoding {
        asset: String,
        #[source]
        source: LinalgError,
    },
    #[error("no {0} configured")]
    MissingCollaborator(&'static str),
    #[error("task failed: {0}")]
    Task(String),
}

/// Fetch every asset on `stack`, run `stage` on it and strip the image.
///
/// Fails up front on an empty stack, or when `stage` encodes faces and the
/// encoder cannot prepare a configured model. Models are prepared on the
/// blocking pool. Per-asset failures are
/// reported in the returned [`BatchReport`].
pub async fn detect<S>(
    stack: ChunkStack<ProcessInput>,
    stage: S,
    ctx: &VisionContext,
) -> Result<BatchReport<ProcessOutput>, PipelineError>
where
    S: Stage<ProcessInput, Output = ProcessInput> + 'static,
{
    if stack.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    if stage.requires_encoder() {
        let mut models: Vec<FaceEncoderModel> = Vec::new();
        for input in stack.items() {
            let model = input.configuration.face_encoder_model;
            if !models.contains(&model) {
                models.push(model);
            }
        }
        for model in models {
            // Model loads block; keep them off the runtime workers.
            let encoder = Arc::clone(&ctx.encoder);
            tokio::task::spawn_blocking(move || encoder.prepare(model))
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))?
                .map_err(|source| PipelineError::ModelUnavailable { model, source })?;
            tracing::info!(model = %model, "encoder model ready");
        }
    }

    let items = stack.item_count();
    let chunks = stack.len();
    let pipe = lift(then(
        FetchAsset::new(Arc::clone(&ctx.fetcher)),
        then(stage, stage_fn(actions::clean)),
    ));
    let report = run_pipeline(stack, Arc::new(pipe)).await;
    tracing::info!(
        items,
        chunks,
        succeeded = report.outputs.len(),
        failed = report.failures.len(),
        "detect finished"
    );
    Ok(report)
}
