//! Chunk-at-a-time batch scheduler.
//!
//! Pops one chunk, runs every item of it as its own tokio task, waits for the
//! whole chunk, then pops the next. A failing or panicking item is recorded
//! in the [`BatchReport`] and never stops its siblings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use super::stack::ChunkStack;
use super::stage::AsyncStage;
use super::PipelineError;

/// An item that did not make it through the stage.
#[derive(Debug)]
pub struct ItemFailure {
    /// Position of the item among everything pushed onto the stack.
    pub index: usize,
    pub error: PipelineError,
}

/// Outcome of one scheduler run.
#[derive(Debug)]
pub struct BatchReport<O> {
    /// Successful outputs, grouped by chunk in the order chunks were popped.
    pub outputs: Vec<O>,
    pub failures: Vec<ItemFailure>,
    /// Number of chunks processed.
    pub chunks: usize,
}

impl<O> Default for BatchReport<O> {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
            failures: Vec::new(),
            chunks: 0,
        }
    }
}

impl<O> BatchReport<O> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All outputs, or the lowest-index failure if any item failed.
    pub fn into_result(mut self) -> Result<Vec<O>, PipelineError> {
        if self.failures.is_empty() {
            return Ok(self.outputs);
        }
        self.failures.sort_by_key(|f| f.index);
        let first = self.failures.swap_remove(0);
        Err(first.error)
    }
}

/// Drain `stack` through `stage`.
pub async fn run_pipeline<I, S>(mut stack: ChunkStack<I>, stage: Arc<S>) -> BatchReport<S::Output>
where
    I: Send + 'static,
    S: AsyncStage<I> + 'static,
    S::Output: Send + 'static,
{
    let mut report = BatchReport::default();

    while let Some(chunk) = stack.pop() {
        let started = Instant::now();
        let offset = chunk.offset;
        let count = chunk.items.len();

        let mut set = JoinSet::new();
        let mut indexes = HashMap::with_capacity(count);
        for (i, item) in chunk.items.into_iter().enumerate() {
            let stage = Arc::clone(&stage);
            let handle = set.spawn(async move { stage.run(item).await });
            indexes.insert(handle.id(), offset + i);
        }

        let mut slots: Vec<Option<Result<S::Output, PipelineError>>> =
            (0..count).map(|_| None).collect();
        while let Some(joined) = set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(PipelineError::Task(e.to_string()))),
            };
            if let Some(&index) = indexes.get(&id) {
                slots[index - offset] = Some(result);
            }
        }

        for (i, slot) in slots.into_iter().enumerate() {
            let index = offset + i;
            match slot {
                Some(Ok(output)) => report.outputs.push(output),
                Some(Err(error)) => {
                    tracing::warn!(index, error = %error, "item failed");
                    report.failures.push(ItemFailure { index, error });
                }
                None => report.failures.push(ItemFailure {
                    index,
                    error: PipelineError::Task("task result lost".into()),
                }),
            }
        }

        report.chunks += 1;
        tracing::debug!(
            chunk = report.chunks,
            items = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chunk processed"
        );
    }

    report
}
