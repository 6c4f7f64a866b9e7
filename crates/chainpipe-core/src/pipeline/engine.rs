//! The pipeline engine: drives stages over one height or over a source.
//!
//! ```text
//! Source ──height──▶ payload = factory(height)
//!                    Setup → Fetch → Parse → Sync → Sequence → Aggregate → Analyze → Persist
//!                    └── full success ──▶ Sink::consume(payload)
//! ```
//!
//! Heights are processed strictly one after another: the next height's
//! stages start only after the previous payload was consumed by the sink.
//! Any stage failure aborts the run and nothing of that height is committed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::retry::{RetryPolicy, TransientPredicate};
use super::selection::TaskSelection;
use super::source::{Sink, Source};
use super::stage::Stage;
use super::task::RunContext;
use crate::error::IndexerError;
use crate::types::Height;

/// Builds a fresh payload for a height.
pub type PayloadFactory<P> = Arc<dyn Fn(Height) -> P + Send + Sync>;

/// Engine-wide execution options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub retry: RetryPolicy,
    pub is_transient: TransientPredicate,
    /// Maximum tasks in flight inside a concurrent stage.
    pub concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            is_transient: IndexerError::is_transient,
            concurrency: 8,
        }
    }
}

pub struct Pipeline<P> {
    stages: Vec<Stage<P>>,
    factory: PayloadFactory<P>,
    concurrency: usize,
}

impl<P: Send + Sync + 'static> Pipeline<P> {
    /// Stages must be given in execution order with no stage repeated.
    pub fn new(
        stages: Vec<Stage<P>>,
        factory: PayloadFactory<P>,
        options: PipelineOptions,
    ) -> Result<Self, IndexerError> {
        for pair in stages.windows(2) {
            if pair[0].name() >= pair[1].name() {
                return Err(IndexerError::Config(format!(
                    "stage {} declared after {}",
                    pair[1].name(),
                    pair[0].name()
                )));
            }
        }
        let stages = stages
            .into_iter()
            .map(|s| s.with_retry(&options.retry, options.is_transient))
            .collect();
        Ok(Self {
            stages,
            factory,
            concurrency: options.concurrency.max(1),
        })
    }

    pub fn stages(&self) -> &[Stage<P>] {
        &self.stages
    }

    /// Process exactly one height and return the payload without committing it.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        height: Height,
        selection: &TaskSelection,
    ) -> Result<P, IndexerError> {
        let ctx = RunContext::new(height, cancel.clone());
        let mut payload = (self.factory)(height);
        self.run_stages(&ctx, &mut payload, selection)
            .instrument(tracing::info_span!("height", height))
            .await?;
        Ok(payload)
    }

    async fn run_stages(
        &self,
        ctx: &RunContext,
        payload: &mut P,
        selection: &TaskSelection,
    ) -> Result<(), IndexerError> {
        for stage in &self.stages {
            ctx.check()?;
            let ran = stage.run(ctx, payload, selection, self.concurrency).await?;
            tracing::debug!(stage = %stage.name(), tasks = ran, "stage complete");
        }
        Ok(())
    }

    /// Process every height the source yields, handing each payload to the sink.
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        source: &mut dyn Source,
        sink: &mut dyn Sink<P>,
        selection: &TaskSelection,
    ) -> Result<(), IndexerError> {
        tracing::info!(
            start = source.start_height(),
            end = source.end_height(),
            len = source.len(),
            dry_run = selection.dry_run,
            "pipeline started"
        );
        while let Some(height) = source.next_height() {
            let payload = match self.run(cancel, height, selection).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(height, error = %e, "processing failed");
                    return Err(e);
                }
            };
            let ctx = RunContext::new(height, cancel.clone());
            sink.consume(&ctx, payload).await?;
        }
        if let Some(e) = source.err() {
            return Err(e.clone());
        }
        tracing::info!(processed = sink.success_count(), "pipeline finished");
        Ok(())
    }
}
