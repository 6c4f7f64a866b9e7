//! Report tracker: one persisted [`Report`] per index or backfill run.
//!
//! The not-completed report is also the cross-process lock for reindexing:
//! a second reindex of a different kind is refused while one is open.

use std::sync::Arc;

use chrono::Utc;

use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{Report, ReportKind};
use chainpipe_core::store::ReportStore;
use chainpipe_core::types::Height;

pub struct ReportTracker {
    reports: Arc<dyn ReportStore>,
    report: Option<Report>,
}

impl ReportTracker {
    pub fn new(reports: Arc<dyn ReportStore>) -> Self {
        Self {
            reports,
            report: None,
        }
    }

    /// The report this tracker opened or reused, if any.
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn report_id(&self) -> Option<u64> {
        self.report.as_ref().map(|r| r.id)
    }

    /// Open a new report for a run.
    pub async fn create(
        &mut self,
        kind: ReportKind,
        version: u64,
        start: Height,
        end: Height,
    ) -> Result<&Report, IndexerError> {
        let report = self
            .reports
            .create(Report::new(kind, version, start, end))
            .await?;
        tracing::info!(report_id = report.id, %kind, version, start, end, "report created");
        Ok(self.report.insert(report))
    }

    /// Reuse the open report of `kind` for `version`, or open one. Fails when
    /// the open report among `kinds` is of another kind.
    pub async fn create_if_not_exists(
        &mut self,
        kind: ReportKind,
        version: u64,
        start: Height,
        end: Height,
        kinds: &[ReportKind],
    ) -> Result<&Report, IndexerError> {
        match self
            .reports
            .find_not_completed_by_index_version(version, kinds)
            .await?
        {
            Some(existing) if existing.kind == kind => {
                let mut report = existing;
                report.start_height = start;
                report.end_height = end;
                self.reports.save(&report).await?;
                tracing::info!(report_id = report.id, %kind, version, "reusing open report");
                Ok(self.report.insert(report))
            }
            Some(existing) => Err(IndexerError::ReindexInProgress {
                kind: existing.kind.to_string(),
            }),
            None => self.create(kind, version, start, end).await,
        }
    }

    /// Stamp completion with `success` of `total` heights and the terminal error, if any.
    pub async fn complete(
        &mut self,
        total: u64,
        success: u64,
        err: Option<&IndexerError>,
    ) -> Result<(), IndexerError> {
        let report = self
            .report
            .as_mut()
            .ok_or_else(|| IndexerError::NotFound("no open report to complete".into()))?;

        let now = Utc::now();
        let success = success.min(total);
        report.success_count = Some(success);
        report.error_count = Some(total - success);
        report.error_msg = err.map(ToString::to_string);
        report.duration_ms = Some((now - report.created_at).num_milliseconds());
        report.completed_at = Some(now);
        self.reports.save(report).await?;

        tracing::info!(
            report_id = report.id,
            kind = %report.kind,
            total,
            success,
            failed = err.is_some(),
            "report completed"
        );
        Ok(())
    }
}
