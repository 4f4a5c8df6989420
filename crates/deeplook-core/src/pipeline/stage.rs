//! Stage composition.
//!
//! A [`Stage`] is a synchronous, single-item transformation; an
//! [`AsyncStage`] returns a boxed future. Stages are chained with the named
//! combinators [`then`] and [`then_async`]; a sync stage joins an async chain
//! only through an explicit [`lift`]. Every chain short-circuits: once a
//! stage fails, later stages never see the item.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use super::PipelineError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait Stage<I>: Send + Sync {
    type Output;

    fn run(&self, input: I) -> Result<Self::Output, PipelineError>;

    /// Whether the stage calls the face encoder, so its model must be
    /// prepared before a run.
    fn requires_encoder(&self) -> bool {
        false
    }
}

pub trait AsyncStage<I>: Send + Sync {
    type Output;

    fn run<'a>(&'a self, input: I) -> BoxFuture<'a, Result<Self::Output, PipelineError>>
    where
        I: 'a;
}

/// Closure-backed sync stage, see [`stage_fn`].
pub struct StageFn<F> {
    f: F,
}

pub fn stage_fn<I, O, F>(f: F) -> StageFn<F>
where
    F: Fn(I) -> Result<O, PipelineError> + Send + Sync,
{
    StageFn { f }
}

impl<I, O, F> Stage<I> for StageFn<F>
where
    F: Fn(I) -> Result<O, PipelineError> + Send + Sync,
{
    type Output = O;

    fn run(&self, input: I) -> Result<O, PipelineError> {
        (self.f)(input)
    }
}

/// Closure-backed async stage, see [`async_stage_fn`].
pub struct AsyncStageFn<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

pub fn async_stage_fn<I, O, F, Fut>(f: F) -> AsyncStageFn<F, Fut>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, PipelineError>> + Send,
{
    AsyncStageFn {
        f,
        _future: PhantomData,
    }
}

impl<I, O, F, Fut> AsyncStage<I> for AsyncStageFn<F, Fut>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, PipelineError>> + Send,
{
    type Output = O;

    fn run<'a>(&'a self, input: I) -> BoxFuture<'a, Result<O, PipelineError>>
    where
        I: 'a,
    {
        let fut = (self.f)(input);
        Box::pin(fut)
    }
}

/// `first` then `second`, both sync.
pub struct Then<F, G> {
    first: F,
    second: G,
}

pub fn then<F, G>(first: F, second: G) -> Then<F, G> {
    Then { first, second }
}

impl<I, F, G> Stage<I> for Then<F, G>
where
    F: Stage<I>,
    G: Stage<F::Output>,
{
    type Output = G::Output;

    fn run(&self, input: I) -> Result<G::Output, PipelineError> {
        let mid = self.first.run(input)?;
        self.second.run(mid)
    }

    fn requires_encoder(&self) -> bool {
        self.first.requires_encoder() || self.second.requires_encoder()
    }
}

/// `first` then `second`, both async.
pub struct ThenAsync<F, G> {
    first: F,
    second: G,
}

pub fn then_async<F, G>(first: F, second: G) -> ThenAsync<F, G> {
    ThenAsync { first, second }
}

impl<I, F, G> AsyncStage<I> for ThenAsync<F, G>
where
    I: Send,
    F: AsyncStage<I>,
    F::Output: Send,
    G: AsyncStage<F::Output>,
{
    type Output = G::Output;

    fn run<'a>(&'a self, input: I) -> BoxFuture<'a, Result<G::Output, PipelineError>>
    where
        I: 'a,
    {
        Box::pin(async move {
            let mid = self.first.run(input).await?;
            self.second.run(mid).await
        })
    }
}

/// A sync stage run on tokio's blocking pool.
pub struct Lift<S> {
    inner: Arc<S>,
}

pub fn lift<S>(stage: S) -> Lift<S> {
    Lift {
        inner: Arc::new(stage),
    }
}

impl<I, S> AsyncStage<I> for Lift<S>
where
    I: Send + 'static,
    S: Stage<I> + 'static,
    S::Output: Send + 'static,
{
    type Output = S::Output;

    fn run<'a>(&'a self, input: I) -> BoxFuture<'a, Result<S::Output, PipelineError>>
    where
        I: 'a,
    {
        let stage = Arc::clone(&self.inner);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || stage.run(input))
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))?
        })
    }
}
