//! Indexer use cases: live index runs, backfills, single-height runs, purge
//! and status.
//!
//! # Index
//! Check the store is allowed to take new heights, then run the pipeline over
//! `[last synced + 1, head]` (batched) under a fresh `Index` report.
//!
//! # Backfill
//! Check eligibility, optionally clear stale reindex reports (`force`), bound
//! the outdated heights, re-mark them unprocessed and run the pipeline over
//! them under a (possibly reused) reindex report.
//!
//! Every run that opened a report completes it, successful or not.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use chainpipe_core::client::ChainClient;
use chainpipe_core::config::IndexerConfig;
use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{Report, ReportKind, Syncable};
use chainpipe_core::pipeline::{
    Pipeline, PipelineOptions, RetryPolicy, RunContext, Sink, Source, TaskSelection,
};
use chainpipe_core::store::Store;
use chainpipe_core::types::{ChainStatus, Height};
use chainpipe_core::version::VersionConfig;

use crate::metrics::{IndexerMetrics, MetricsSnapshot};
use crate::payload::Payload;
use crate::report::ReportTracker;
use crate::sink::IndexSink;
use crate::source::{DiffSource, RangeSource};
use crate::status::VersionStatus;
use crate::tasks::{build_stages, TaskDeps};

// ─── Requests / results ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct IndexRequest {
    /// Heights per run; `None` falls back to the configured default.
    pub batch_size: Option<u64>,
    /// Resume point override.
    pub start_height: Option<Height>,
}

#[derive(Debug, Clone, Default)]
pub struct BackfillRequest {
    pub parallel: bool,
    pub force: bool,
    /// Restrict the rerun to these targets; empty reruns the missing versions.
    pub target_ids: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RunHeightRequest {
    pub height: Height,
    /// Versions whose tasks run; empty means every version.
    pub version_ids: Vec<u64>,
    /// Further restrict to these targets' tasks.
    pub target_ids: Vec<u64>,
    pub dry: bool,
}

/// Outcome of a completed index or backfill run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub report_id: u64,
    pub kind: ReportKind,
    pub version: u64,
    pub start_height: Height,
    pub end_height: Height,
    pub success_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PurgeSummary {
    pub block_seqs: u64,
    pub validator_seqs: u64,
    pub validator_group_seqs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexerStatus {
    pub chain: ChainStatus,
    pub most_recent: Option<Syncable>,
    pub most_recent_processed: Option<Syncable>,
    pub versions: VersionStatus,
    pub last_report: Option<Report>,
    pub metrics: MetricsSnapshot,
}

// ─── Indexer ──────────────────────────────────────────────────────────────────

pub struct Indexer {
    config: IndexerConfig,
    versions: VersionConfig,
    client: Arc<dyn ChainClient>,
    store: Store,
    metrics: IndexerMetrics,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        versions: VersionConfig,
        client: Arc<dyn ChainClient>,
        store: Store,
    ) -> Self {
        Self {
            config,
            versions,
            client,
            store,
            metrics: IndexerMetrics::new(),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn versions(&self) -> &VersionConfig {
        &self.versions
    }

    pub fn metrics(&self) -> &IndexerMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Pipeline whose payloads are stamped with `version` and `report_id`.
    fn pipeline(&self, version: u64, report_id: Option<u64>) -> Result<Pipeline<Payload>, IndexerError> {
        let deps = TaskDeps {
            client: self.client.clone(),
            store: self.store.clone(),
            analyzer: self.config.analyzer.clone(),
        };
        let options = PipelineOptions {
            retry: RetryPolicy::new(self.config.task_max_attempts, self.config.task_retry_backoff()),
            is_transient: IndexerError::is_transient,
            concurrency: self.config.stage_concurrency,
        };
        Pipeline::new(
            build_stages(&deps)?,
            Arc::new(move |h| Payload::new(h, version, report_id)),
            options,
        )
    }

    fn sink(&self) -> IndexSink {
        IndexSink::new(self.store.syncables.clone(), self.client.clone(), self.metrics.clone())
    }

    pub async fn version_status(&self) -> Result<VersionStatus, IndexerError> {
        VersionStatus::load(self.store.syncables.as_ref(), &self.versions).await
    }

    /// Run the pipeline over `source` and complete the tracker's report with the outcome.
    async fn run_tracked(
        &self,
        cancel: &CancellationToken,
        tracker: &mut ReportTracker,
        version: u64,
        source: &mut dyn Source,
        selection: &TaskSelection,
    ) -> Result<u64, IndexerError> {
        let total = source.len();
        let mut sink = self.sink();
        let result = match self.pipeline(version, tracker.report_id()) {
            Ok(pipeline) => pipeline.start(cancel, source, &mut sink, selection).await,
            Err(e) => Err(e),
        };
        tracker
            .complete(total, sink.success_count(), result.as_ref().err())
            .await?;
        result.map(|_| sink.success_count())
    }

    // ─── Use cases ────────────────────────────────────────────────────────────

    pub async fn start_index(
        &self,
        cancel: &CancellationToken,
        req: IndexRequest,
    ) -> Result<RunSummary, IndexerError> {
        self.version_status().await?.can_index()?;

        let version = self.versions.current_version_id();
        let selection = TaskSelection::all()
            .with_version_tasks(self.versions.tasks_for_versions(&self.versions.all_version_ids())?);
        let mut source = RangeSource::new(
            self.store.syncables.as_ref(),
            self.client.as_ref(),
            req.start_height,
            req.batch_size.unwrap_or(self.config.default_batch_size),
            self.config.first_block_height,
        )
        .await?;

        let mut tracker = ReportTracker::new(self.store.reports.clone());
        let report_id = tracker
            .create(ReportKind::Index, version, source.start_height(), source.end_height())
            .await?
            .id;

        let success_count = self
            .run_tracked(cancel, &mut tracker, version, &mut source, &selection)
            .await?;

        Ok(RunSummary {
            report_id,
            kind: ReportKind::Index,
            version,
            start_height: source.start_height(),
            end_height: source.end_height(),
            success_count,
        })
    }

    pub async fn backfill(
        &self,
        cancel: &CancellationToken,
        req: BackfillRequest,
    ) -> Result<RunSummary, IndexerError> {
        let status = self.version_status().await?;
        status.can_backfill(req.parallel)?;

        let kind = if req.parallel {
            ReportKind::ParallelReindex
        } else {
            ReportKind::SequentialReindex
        };
        // Bad target ids must fail before a report is deleted, opened or reset.
        let tasks = if req.target_ids.is_empty() {
            self.versions.tasks_for_versions(&status.missing_versions)?
        } else {
            self.versions.tasks_for_targets(&req.target_ids)?
        };
        let selection = TaskSelection::all().with_version_tasks(tasks);

        if req.force {
            let removed = self
                .store
                .reports
                .delete_not_completed_by_kinds(&ReportKind::REINDEX)
                .await?;
            tracing::warn!(removed, "force: open reindex reports deleted");
        }

        let version = status.current_version;
        let mut source = DiffSource::new(self.store.syncables.as_ref(), version).await?;
        let (start, end) = (source.start_height(), source.end_height());

        let mut tracker = ReportTracker::new(self.store.reports.clone());
        let report_id = tracker
            .create_if_not_exists(kind, version, start, end, &ReportKind::REINDEX)
            .await?
            .id;

        let reset = match self
            .store
            .syncables
            .set_processed_at_for_range(report_id, start, end)
            .await
        {
            Ok(reset) => reset,
            Err(e) => {
                tracker.complete(source.len(), 0, Some(&e)).await?;
                return Err(e);
            }
        };
        tracing::info!(%kind, version, start, end, reset, "backfill started");

        let success_count = self
            .run_tracked(cancel, &mut tracker, version, &mut source, &selection)
            .await?;

        Ok(RunSummary {
            report_id,
            kind,
            version,
            start_height: start,
            end_height: end,
            success_count,
        })
    }

    /// Process one height. Non-dry runs commit it like an index run would.
    pub async fn run_height(
        &self,
        cancel: &CancellationToken,
        req: RunHeightRequest,
    ) -> Result<Payload, IndexerError> {
        let version_ids = if req.version_ids.is_empty() {
            self.versions.all_version_ids()
        } else {
            req.version_ids.clone()
        };
        let mut selection = TaskSelection::all()
            .dry_run(req.dry)
            .with_version_tasks(self.versions.tasks_for_versions(&version_ids)?);
        if !req.target_ids.is_empty() {
            selection = selection.with_target_tasks(self.versions.tasks_for_targets(&req.target_ids)?);
        }

        let version = version_ids
            .iter()
            .copied()
            .max()
            .unwrap_or_else(|| self.versions.current_version_id());
        let payload = self.pipeline(version, None)?.run(cancel, req.height, &selection).await?;

        if req.dry {
            tracing::debug!(height = req.height, payload = ?payload, "dry run payload");
        } else {
            let ctx = RunContext::new(req.height, cancel.clone());
            self.sink().consume(&ctx, payload.clone()).await?;
        }
        Ok(payload)
    }

    /// Delete sequences older than the configured retention windows.
    pub async fn purge(&self) -> Result<PurgeSummary, IndexerError> {
        let purge = &self.config.purge;
        let mut summary = PurgeSummary::default();
        let now = Utc::now();

        if purge.block_sequences_retention_hours > 0 {
            let cutoff = now - ChronoDuration::hours(purge.block_sequences_retention_hours as i64);
            summary.block_seqs = self.store.block_seqs.delete_older_than(cutoff).await?;
        }
        if purge.validator_sequences_retention_hours > 0 {
            let cutoff = now - ChronoDuration::hours(purge.validator_sequences_retention_hours as i64);
            summary.validator_seqs = self.store.validator_seqs.delete_older_than(cutoff).await?;
            summary.validator_group_seqs = self
                .store
                .validator_group_seqs
                .delete_older_than(cutoff)
                .await?;
        }
        tracing::info!(
            block_seqs = summary.block_seqs,
            validator_seqs = summary.validator_seqs,
            validator_group_seqs = summary.validator_group_seqs,
            "purge complete"
        );
        Ok(summary)
    }

    pub async fn status(&self) -> Result<IndexerStatus, IndexerError> {
        Ok(IndexerStatus {
            chain: self.client.status().await?,
            most_recent: self.store.syncables.find_most_recent().await?,
            most_recent_processed: self.store.syncables.find_most_recent_processed().await?,
            versions: self.version_status().await?,
            last_report: self.store.reports.find_most_recent().await?,
            metrics: self.metrics.snapshot(),
        })
    }

    /// Every task name the version configuration knows, for `info` output.
    pub fn known_tasks(&self) -> BTreeSet<String> {
        self.versions.all_tasks()
    }
}
