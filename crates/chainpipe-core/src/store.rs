//! Repository contracts, one trait per record kind.
//!
//! Implementations live in `chainpipe-storage` (memory, SQLite). Lookups that
//! may legitimately find nothing return `Option` / empty `Vec`; errors are
//! reserved for backend failures.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IndexerError;
use crate::model::{
    AccountActivitySeq, BlockSeq, GovernanceActivitySeq, Job, ProposalAgg, Report, ReportKind,
    Syncable, SystemEvent, SystemEventKind, ValidatorAgg, ValidatorGroupAgg, ValidatorGroupSeq,
    ValidatorSeq,
};
use crate::types::{Height, RawHeightData};

// ─── Bookkeeping ──────────────────────────────────────────────────────────────

#[async_trait]
pub trait SyncableStore: Send + Sync {
    async fn find_by_height(&self, height: Height) -> Result<Option<Syncable>, IndexerError>;

    /// Highest stored height, processed or not.
    async fn find_most_recent(&self) -> Result<Option<Syncable>, IndexerError>;

    /// Highest height with `processed_at` set.
    async fn find_most_recent_processed(&self) -> Result<Option<Syncable>, IndexerError>;

    /// Lowest height whose index version differs from `version`.
    async fn find_first_by_different_index_version(
        &self,
        version: u64,
    ) -> Result<Option<Syncable>, IndexerError>;

    /// Highest height whose index version differs from `version`.
    async fn find_most_recent_by_different_index_version(
        &self,
        version: u64,
    ) -> Result<Option<Syncable>, IndexerError>;

    /// Smallest index version present among stored heights.
    async fn find_smallest_index_version(&self) -> Result<Option<u64>, IndexerError>;

    async fn create_or_update(&self, syncable: &Syncable) -> Result<(), IndexerError>;

    /// Clear `processed_at` and stamp `report_id` for every height in `[start, end]`.
    /// Returns the number of rows touched.
    async fn set_processed_at_for_range(
        &self,
        report_id: u64,
        start: Height,
        end: Height,
    ) -> Result<u64, IndexerError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert a new report and return it with its assigned id.
    async fn create(&self, report: Report) -> Result<Report, IndexerError>;

    async fn save(&self, report: &Report) -> Result<(), IndexerError>;

    async fn find_not_completed_by_index_version(
        &self,
        version: u64,
        kinds: &[ReportKind],
    ) -> Result<Option<Report>, IndexerError>;

    /// Delete every not-completed report of the given kinds. Returns how many were removed.
    async fn delete_not_completed_by_kinds(&self, kinds: &[ReportKind]) -> Result<u64, IndexerError>;

    async fn find_most_recent(&self) -> Result<Option<Report>, IndexerError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_unfinished(&self) -> Result<Vec<Job>, IndexerError>;

    /// Job with the highest height.
    async fn find_last(&self) -> Result<Option<Job>, IndexerError>;

    async fn create_many(&self, jobs: &[Job]) -> Result<(), IndexerError>;

    async fn update(&self, job: &Job) -> Result<(), IndexerError>;
}

// ─── Sequences ────────────────────────────────────────────────────────────────

#[async_trait]
pub trait BlockSeqStore: Send + Sync {
    async fn upsert(&self, seq: &BlockSeq) -> Result<(), IndexerError>;

    async fn find_by_height(&self, height: Height) -> Result<Option<BlockSeq>, IndexerError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError>;
}

#[async_trait]
pub trait ValidatorSeqStore: Send + Sync {
    async fn bulk_upsert(&self, seqs: &[ValidatorSeq]) -> Result<(), IndexerError>;

    async fn find_by_height(&self, height: Height) -> Result<Vec<ValidatorSeq>, IndexerError>;

    /// Up to `limit` records for `address` strictly below `before`, most recent first.
    async fn find_last_by_address(
        &self,
        address: &str,
        before: Height,
        limit: usize,
    ) -> Result<Vec<ValidatorSeq>, IndexerError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError>;
}

#[async_trait]
pub trait ValidatorGroupSeqStore: Send + Sync {
    async fn bulk_upsert(&self, seqs: &[ValidatorGroupSeq]) -> Result<(), IndexerError>;

    async fn find_by_height(&self, height: Height) -> Result<Vec<ValidatorGroupSeq>, IndexerError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError>;
}

#[async_trait]
pub trait AccountActivitySeqStore: Send + Sync {
    async fn bulk_upsert(&self, seqs: &[AccountActivitySeq]) -> Result<(), IndexerError>;

    async fn find_by_height(&self, height: Height) -> Result<Vec<AccountActivitySeq>, IndexerError>;

    async fn find_by_height_and_kind(
        &self,
        height: Height,
        kind: &str,
    ) -> Result<Vec<AccountActivitySeq>, IndexerError>;
}

#[async_trait]
pub trait GovernanceActivitySeqStore: Send + Sync {
    async fn bulk_upsert(&self, seqs: &[GovernanceActivitySeq]) -> Result<(), IndexerError>;

    async fn find_by_height(&self, height: Height) -> Result<Vec<GovernanceActivitySeq>, IndexerError>;
}

// ─── Aggregates ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait ValidatorAggStore: Send + Sync {
    async fn find_by_address(&self, address: &str) -> Result<Option<ValidatorAgg>, IndexerError>;

    async fn upsert(&self, agg: &ValidatorAgg) -> Result<(), IndexerError>;
}

#[async_trait]
pub trait ValidatorGroupAggStore: Send + Sync {
    async fn find_by_address(&self, address: &str) -> Result<Option<ValidatorGroupAgg>, IndexerError>;

    async fn upsert(&self, agg: &ValidatorGroupAgg) -> Result<(), IndexerError>;
}

#[async_trait]
pub trait ProposalAggStore: Send + Sync {
    async fn find_by_proposal_id(&self, proposal_id: u64) -> Result<Option<ProposalAgg>, IndexerError>;

    async fn upsert(&self, agg: &ProposalAgg) -> Result<(), IndexerError>;
}

// ─── System events / raw cache ────────────────────────────────────────────────

#[async_trait]
pub trait SystemEventStore: Send + Sync {
    /// Upsert by `(height, actor, kind)`.
    async fn bulk_upsert(&self, events: &[SystemEvent]) -> Result<(), IndexerError>;

    async fn find_by_height(&self, height: Height) -> Result<Vec<SystemEvent>, IndexerError>;

    /// Events for `actor` at or above `min_height`; an empty `kinds` matches every kind.
    async fn find_by_actor(
        &self,
        actor: &str,
        kinds: &[SystemEventKind],
        min_height: Height,
    ) -> Result<Vec<SystemEvent>, IndexerError>;
}

/// Cache of raw height data written by fetch workers.
#[async_trait]
pub trait RawHeightStore: Send + Sync {
    async fn save(&self, data: &RawHeightData) -> Result<(), IndexerError>;

    async fn find_by_height(&self, height: Height) -> Result<Option<RawHeightData>, IndexerError>;
}

// ─── Bundle ───────────────────────────────────────────────────────────────────

/// A backend implementing every repository.
pub trait StoreBackend:
    SyncableStore
    + ReportStore
    + JobStore
    + BlockSeqStore
    + ValidatorSeqStore
    + ValidatorGroupSeqStore
    + AccountActivitySeqStore
    + GovernanceActivitySeqStore
    + ValidatorAggStore
    + ValidatorGroupAggStore
    + ProposalAggStore
    + SystemEventStore
    + RawHeightStore
{
}

impl<T> StoreBackend for T where
    T: SyncableStore
        + ReportStore
        + JobStore
        + BlockSeqStore
        + ValidatorSeqStore
        + ValidatorGroupSeqStore
        + AccountActivitySeqStore
        + GovernanceActivitySeqStore
        + ValidatorAggStore
        + ValidatorGroupAggStore
        + ProposalAggStore
        + SystemEventStore
        + RawHeightStore
{
}

/// Typed handles to every repository the indexer uses.
#[derive(Clone)]
pub struct Store {
    pub syncables: Arc<dyn SyncableStore>,
    pub reports: Arc<dyn ReportStore>,
    pub jobs: Arc<dyn JobStore>,
    pub block_seqs: Arc<dyn BlockSeqStore>,
    pub validator_seqs: Arc<dyn ValidatorSeqStore>,
    pub validator_group_seqs: Arc<dyn ValidatorGroupSeqStore>,
    pub account_activity_seqs: Arc<dyn AccountActivitySeqStore>,
    pub governance_activity_seqs: Arc<dyn GovernanceActivitySeqStore>,
    pub validator_aggs: Arc<dyn ValidatorAggStore>,
    pub validator_group_aggs: Arc<dyn ValidatorGroupAggStore>,
    pub proposal_aggs: Arc<dyn ProposalAggStore>,
    pub system_events: Arc<dyn SystemEventStore>,
    pub raw_heights: Arc<dyn RawHeightStore>,
}

impl Store {
    pub fn from_backend<B: StoreBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            syncables: backend.clone(),
            reports: backend.clone(),
            jobs: backend.clone(),
            block_seqs: backend.clone(),
            validator_seqs: backend.clone(),
            validator_group_seqs: backend.clone(),
            account_activity_seqs: backend.clone(),
            governance_activity_seqs: backend.clone(),
            validator_aggs: backend.clone(),
            validator_group_aggs: backend.clone(),
            proposal_aggs: backend.clone(),
            system_events: backend.clone(),
            raw_heights: backend,
        }
    }
}
