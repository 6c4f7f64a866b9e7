//! The fetch job manager: keeps a queue of per-height fetch jobs and dispatches
//! them to workers in rounds.
//!
//! # Round
//! 1. When no job is unfinished, create the next batch: heights
//!    `[max(last job + 1, first height), min(head, start + batch - 1)]`.
//! 2. Skip jobs still inside their backoff window (measured from their last
//!    dispatch).
//! 3. Stamp the rest as started, dispatch them concurrently and record each
//!    outcome. Success drops the job's backoff state; failure grows it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use chainpipe_core::backoff::Backoff;
use chainpipe_core::client::ChainClient;
use chainpipe_core::config::JobsConfig;
use chainpipe_core::error::IndexerError;
use chainpipe_core::model::Job;
use chainpipe_core::store::JobStore;
use chainpipe_core::types::Height;

use super::worker::FetchWorker;

/// Counters for one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub created: u64,
    pub dispatched: u64,
    pub delayed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct JobManager {
    jobs: Arc<dyn JobStore>,
    client: Arc<dyn ChainClient>,
    worker: Arc<dyn FetchWorker>,
    config: JobsConfig,
    first_height: Height,
    backoffs: HashMap<Height, Backoff>,
}

impl JobManager {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        client: Arc<dyn ChainClient>,
        worker: Arc<dyn FetchWorker>,
        config: JobsConfig,
        first_height: Height,
    ) -> Self {
        Self {
            jobs,
            client,
            worker,
            config,
            first_height,
            backoffs: HashMap::new(),
        }
    }

    /// Dispatch rounds until `cancel` fires. Round errors are logged, not fatal.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), IndexerError> {
        tracing::info!(
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "job manager started"
        );
        while !cancel.is_cancelled() {
            match self.run_round().await {
                Ok(s) if s.dispatched > 0 || s.created > 0 => tracing::info!(
                    created = s.created,
                    dispatched = s.dispatched,
                    delayed = s.delayed,
                    succeeded = s.succeeded,
                    failed = s.failed,
                    "job round complete"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "job round failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        tracing::info!("job manager stopped");
        Ok(())
    }

    pub async fn run_round(&mut self) -> Result<RoundSummary, IndexerError> {
        self.round_at(Utc::now()).await
    }

    /// One round evaluated at `now`.
    pub async fn round_at(&mut self, now: DateTime<Utc>) -> Result<RoundSummary, IndexerError> {
        let mut summary = RoundSummary::default();

        let mut pending = self.jobs.find_unfinished().await?;
        if pending.is_empty() {
            pending = self.create_batch(now).await?;
            summary.created = pending.len() as u64;
        }
        pending.sort_by_key(|j| j.height);

        let mut ready = Vec::with_capacity(pending.len());
        for mut job in pending {
            if self.is_delayed(&job, now) {
                summary.delayed += 1;
                continue;
            }
            job.started_at = Some(now);
            job.run_count += 1;
            self.jobs.update(&job).await?;
            ready.push(job);
        }
        summary.dispatched = ready.len() as u64;

        let worker = self.worker.clone();
        let outcomes: Vec<(Job, Result<(), IndexerError>)> = stream::iter(ready)
            .map(|job| {
                let worker = worker.clone();
                async move {
                    let result = worker.fetch(job.height).await;
                    (job, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let backoff_config = self.config.backoff();
        for (mut job, result) in outcomes {
            match result {
                Ok(()) => {
                    self.backoffs.remove(&job.height);
                    job.last_error = None;
                    job.finished_at = Some(now);
                    summary.succeeded += 1;
                }
                Err(e) => {
                    let backoff = self
                        .backoffs
                        .entry(job.height)
                        .or_insert_with(|| Backoff::new(backoff_config));
                    backoff.attempt();
                    tracing::warn!(
                        height = job.height,
                        run_count = job.run_count,
                        retry_in_ms = backoff.delay().as_millis() as u64,
                        error = %e,
                        "fetch job failed"
                    );
                    job.last_error = Some(e.to_string());
                    summary.failed += 1;
                }
            }
            self.jobs.update(&job).await?;
        }
        Ok(summary)
    }

    fn is_delayed(&self, job: &Job, now: DateTime<Utc>) -> bool {
        let (Some(backoff), Some(started_at)) = (self.backoffs.get(&job.height), job.started_at) else {
            return false;
        };
        match ChronoDuration::from_std(backoff.delay()) {
            Ok(delay) => now - started_at < delay,
            Err(_) => true,
        }
    }

    async fn create_batch(&self, now: DateTime<Utc>) -> Result<Vec<Job>, IndexerError> {
        let start = match self.jobs.find_last().await? {
            Some(last) => (last.height + 1).max(self.first_height),
            None => self.first_height,
        };
        let head = self.client.status().await?.latest_height;
        if start > head {
            tracing::debug!(start, head, "no new heights to queue");
            return Ok(Vec::new());
        }
        let end = head.min(start.saturating_add(self.config.batch_size.max(1) - 1));

        let jobs: Vec<Job> = (start..=end).map(|h| Job::new(h, now)).collect();
        self.jobs.create_many(&jobs).await?;
        tracing::info!(start, end, "fetch jobs created");
        Ok(jobs)
    }
}
