//! In-memory storage backend.
//!
//! Keeps every repository in RAM behind `Mutex`-guarded maps.
//! Useful for testing, dry runs and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{
    AccountActivitySeq, BlockSeq, GovernanceActivitySeq, Job, ProposalAgg, Report, ReportKind,
    Syncable, SystemEvent, SystemEventKind, ValidatorAgg, ValidatorGroupAgg, ValidatorGroupSeq,
    ValidatorSeq,
};
use chainpipe_core::store::{
    AccountActivitySeqStore, BlockSeqStore, GovernanceActivitySeqStore, JobStore, ProposalAggStore,
    RawHeightStore, ReportStore, SyncableStore, SystemEventStore, ValidatorAggStore,
    ValidatorGroupAggStore, ValidatorGroupSeqStore, ValidatorSeqStore,
};
use chainpipe_core::types::{Height, RawHeightData};

type SystemEventKey = (Height, String, SystemEventKind);
type ActivityKey = (Height, String, String, String);

/// In-memory indexer storage.
///
/// All data is lost when the process exits. Height-keyed maps are `BTreeMap`s
/// so "most recent" lookups are a walk from the back.
#[derive(Default)]
pub struct InMemoryStorage {
    syncables: Mutex<BTreeMap<Height, Syncable>>,
    reports: Mutex<BTreeMap<u64, Report>>,
    jobs: Mutex<BTreeMap<Height, Job>>,
    block_seqs: Mutex<BTreeMap<Height, BlockSeq>>,
    validator_seqs: Mutex<BTreeMap<(Height, String), ValidatorSeq>>,
    validator_group_seqs: Mutex<BTreeMap<(Height, String), ValidatorGroupSeq>>,
    account_activity_seqs: Mutex<BTreeMap<ActivityKey, AccountActivitySeq>>,
    governance_activity_seqs: Mutex<BTreeMap<ActivityKey, GovernanceActivitySeq>>,
    validator_aggs: Mutex<HashMap<String, ValidatorAgg>>,
    validator_group_aggs: Mutex<HashMap<String, ValidatorGroupAgg>>,
    proposal_aggs: Mutex<HashMap<u64, ProposalAgg>>,
    system_events: Mutex<BTreeMap<SystemEventKey, SystemEvent>>,
    raw_heights: Mutex<BTreeMap<Height, RawHeightData>>,
}

/// Every write leaves the maps consistent, so a poisoned lock is still usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored syncables.
    pub fn syncable_count(&self) -> usize {
        lock(&self.syncables).len()
    }

    /// Total number of stored system events.
    pub fn system_event_count(&self) -> usize {
        lock(&self.system_events).len()
    }

    /// Every job, ordered by height.
    pub fn all_jobs(&self) -> Vec<Job> {
        lock(&self.jobs).values().cloned().collect()
    }

    /// Every report, ordered by id.
    pub fn all_reports(&self) -> Vec<Report> {
        lock(&self.reports).values().cloned().collect()
    }
}

// ─── Bookkeeping ──────────────────────────────────────────────────────────────

#[async_trait]
impl SyncableStore for InMemoryStorage {
    async fn find_by_height(&self, height: Height) -> Result<Option<Syncable>, IndexerError> {
        Ok(lock(&self.syncables).get(&height).cloned())
    }

    async fn find_most_recent(&self) -> Result<Option<Syncable>, IndexerError> {
        Ok(lock(&self.syncables).values().next_back().cloned())
    }

    async fn find_most_recent_processed(&self) -> Result<Option<Syncable>, IndexerError> {
        Ok(lock(&self.syncables)
            .values()
            .rev()
            .find(|s| s.is_processed())
            .cloned())
    }

    async fn find_first_by_different_index_version(
        &self,
        version: u64,
    ) -> Result<Option<Syncable>, IndexerError> {
        Ok(lock(&self.syncables)
            .values()
            .find(|s| s.index_version != version)
            .cloned())
    }

    async fn find_most_recent_by_different_index_version(
        &self,
        version: u64,
    ) -> Result<Option<Syncable>, IndexerError> {
        Ok(lock(&self.syncables)
            .values()
            .rev()
            .find(|s| s.index_version != version)
            .cloned())
    }

    async fn find_smallest_index_version(&self) -> Result<Option<u64>, IndexerError> {
        Ok(lock(&self.syncables).values().map(|s| s.index_version).min())
    }

    async fn create_or_update(&self, syncable: &Syncable) -> Result<(), IndexerError> {
        lock(&self.syncables).insert(syncable.height, syncable.clone());
        Ok(())
    }

    async fn set_processed_at_for_range(
        &self,
        report_id: u64,
        start: Height,
        end: Height,
    ) -> Result<u64, IndexerError> {
        let mut syncables = lock(&self.syncables);
        let mut touched = 0;
        for s in syncables.range_mut(start..=end).map(|(_, s)| s) {
            s.processed_at = None;
            s.report_id = Some(report_id);
            touched += 1;
        }
        Ok(touched)
    }
}

#[async_trait]
impl ReportStore for InMemoryStorage {
    async fn create(&self, mut report: Report) -> Result<Report, IndexerError> {
        let mut reports = lock(&self.reports);
        report.id = reports.keys().next_back().map_or(1, |id| id + 1);
        reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn save(&self, report: &Report) -> Result<(), IndexerError> {
        let mut reports = lock(&self.reports);
        match reports.get_mut(&report.id) {
            Some(slot) => {
                *slot = report.clone();
                Ok(())
            }
            None => Err(IndexerError::NotFound(format!("report {}", report.id))),
        }
    }

    async fn find_not_completed_by_index_version(
        &self,
        version: u64,
        kinds: &[ReportKind],
    ) -> Result<Option<Report>, IndexerError> {
        Ok(lock(&self.reports)
            .values()
            .rev()
            .find(|r| r.index_version == version && !r.is_completed() && kinds.contains(&r.kind))
            .cloned())
    }

    async fn delete_not_completed_by_kinds(&self, kinds: &[ReportKind]) -> Result<u64, IndexerError> {
        let mut reports = lock(&self.reports);
        let before = reports.len();
        reports.retain(|_, r| r.is_completed() || !kinds.contains(&r.kind));
        Ok((before - reports.len()) as u64)
    }

    async fn find_most_recent(&self) -> Result<Option<Report>, IndexerError> {
        Ok(lock(&self.reports).values().next_back().cloned())
    }
}

#[async_trait]
impl JobStore for InMemoryStorage {
    async fn find_unfinished(&self) -> Result<Vec<Job>, IndexerError> {
        Ok(lock(&self.jobs)
            .values()
            .filter(|j| !j.is_finished())
            .cloned()
            .collect())
    }

    async fn find_last(&self) -> Result<Option<Job>, IndexerError> {
        Ok(lock(&self.jobs).values().next_back().cloned())
    }

    async fn create_many(&self, jobs: &[Job]) -> Result<(), IndexerError> {
        let mut stored = lock(&self.jobs);
        for job in jobs {
            stored.entry(job.height).or_insert_with(|| job.clone());
        }
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), IndexerError> {
        lock(&self.jobs).insert(job.height, job.clone());
        Ok(())
    }
}

// ─── Sequences ────────────────────────────────────────────────────────────────

#[async_trait]
impl BlockSeqStore for InMemoryStorage {
    async fn upsert(&self, seq: &BlockSeq) -> Result<(), IndexerError> {
        lock(&self.block_seqs).insert(seq.height, seq.clone());
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Option<BlockSeq>, IndexerError> {
        Ok(lock(&self.block_seqs).get(&height).cloned())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError> {
        let mut seqs = lock(&self.block_seqs);
        let before = seqs.len();
        seqs.retain(|_, s| s.time >= cutoff);
        Ok((before - seqs.len()) as u64)
    }
}

#[async_trait]
impl ValidatorSeqStore for InMemoryStorage {
    async fn bulk_upsert(&self, seqs: &[ValidatorSeq]) -> Result<(), IndexerError> {
        let mut stored = lock(&self.validator_seqs);
        for seq in seqs {
            stored.insert((seq.height, seq.address.clone()), seq.clone());
        }
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<ValidatorSeq>, IndexerError> {
        Ok(lock(&self.validator_seqs)
            .values()
            .filter(|s| s.height == height)
            .cloned()
            .collect())
    }

    async fn find_last_by_address(
        &self,
        address: &str,
        before: Height,
        limit: usize,
    ) -> Result<Vec<ValidatorSeq>, IndexerError> {
        Ok(lock(&self.validator_seqs)
            .values()
            .rev()
            .filter(|s| s.height < before && s.address == address)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError> {
        let mut seqs = lock(&self.validator_seqs);
        let before = seqs.len();
        seqs.retain(|_, s| s.time >= cutoff);
        Ok((before - seqs.len()) as u64)
    }
}

#[async_trait]
impl ValidatorGroupSeqStore for InMemoryStorage {
    async fn bulk_upsert(&self, seqs: &[ValidatorGroupSeq]) -> Result<(), IndexerError> {
        let mut stored = lock(&self.validator_group_seqs);
        for seq in seqs {
            stored.insert((seq.height, seq.address.clone()), seq.clone());
        }
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<ValidatorGroupSeq>, IndexerError> {
        Ok(lock(&self.validator_group_seqs)
            .values()
            .filter(|s| s.height == height)
            .cloned()
            .collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, IndexerError> {
        let mut seqs = lock(&self.validator_group_seqs);
        let before = seqs.len();
        seqs.retain(|_, s| s.time >= cutoff);
        Ok((before - seqs.len()) as u64)
    }
}

#[async_trait]
impl AccountActivitySeqStore for InMemoryStorage {
    async fn bulk_upsert(&self, seqs: &[AccountActivitySeq]) -> Result<(), IndexerError> {
        let mut stored = lock(&self.account_activity_seqs);
        for seq in seqs {
            let key = (
                seq.height,
                seq.tx_hash.clone(),
                seq.address.clone(),
                seq.kind.clone(),
            );
            stored.insert(key, seq.clone());
        }
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<AccountActivitySeq>, IndexerError> {
        Ok(lock(&self.account_activity_seqs)
            .values()
            .filter(|s| s.height == height)
            .cloned()
            .collect())
    }

    async fn find_by_height_and_kind(
        &self,
        height: Height,
        kind: &str,
    ) -> Result<Vec<AccountActivitySeq>, IndexerError> {
        Ok(lock(&self.account_activity_seqs)
            .values()
            .filter(|s| s.height == height && s.kind == kind)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GovernanceActivitySeqStore for InMemoryStorage {
    async fn bulk_upsert(&self, seqs: &[GovernanceActivitySeq]) -> Result<(), IndexerError> {
        let mut stored = lock(&self.governance_activity_seqs);
        for seq in seqs {
            let key = (
                seq.height,
                seq.tx_hash.clone(),
                format!("{}:{}", seq.proposal_id, seq.account),
                seq.kind.clone(),
            );
            stored.insert(key, seq.clone());
        }
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<GovernanceActivitySeq>, IndexerError> {
        Ok(lock(&self.governance_activity_seqs)
            .values()
            .filter(|s| s.height == height)
            .cloned()
            .collect())
    }
}

// ─── Aggregates ───────────────────────────────────────────────────────────────

#[async_trait]
impl ValidatorAggStore for InMemoryStorage {
    async fn find_by_address(&self, address: &str) -> Result<Option<ValidatorAgg>, IndexerError> {
        Ok(lock(&self.validator_aggs).get(address).cloned())
    }

    async fn upsert(&self, agg: &ValidatorAgg) -> Result<(), IndexerError> {
        lock(&self.validator_aggs).insert(agg.address.clone(), agg.clone());
        Ok(())
    }
}

#[async_trait]
impl ValidatorGroupAggStore for InMemoryStorage {
    async fn find_by_address(&self, address: &str) -> Result<Option<ValidatorGroupAgg>, IndexerError> {
        Ok(lock(&self.validator_group_aggs).get(address).cloned())
    }

    async fn upsert(&self, agg: &ValidatorGroupAgg) -> Result<(), IndexerError> {
        lock(&self.validator_group_aggs).insert(agg.address.clone(), agg.clone());
        Ok(())
    }
}

#[async_trait]
impl ProposalAggStore for InMemoryStorage {
    async fn find_by_proposal_id(&self, proposal_id: u64) -> Result<Option<ProposalAgg>, IndexerError> {
        Ok(lock(&self.proposal_aggs).get(&proposal_id).cloned())
    }

    async fn upsert(&self, agg: &ProposalAgg) -> Result<(), IndexerError> {
        lock(&self.proposal_aggs).insert(agg.proposal_id, agg.clone());
        Ok(())
    }
}

// ─── System events / raw cache ────────────────────────────────────────────────

#[async_trait]
impl SystemEventStore for InMemoryStorage {
    async fn bulk_upsert(&self, events: &[SystemEvent]) -> Result<(), IndexerError> {
        let mut stored = lock(&self.system_events);
        for event in events {
            stored.insert((event.height, event.actor.clone(), event.kind), event.clone());
        }
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Vec<SystemEvent>, IndexerError> {
        Ok(lock(&self.system_events)
            .values()
            .filter(|e| e.height == height)
            .cloned()
            .collect())
    }

    async fn find_by_actor(
        &self,
        actor: &str,
        kinds: &[SystemEventKind],
        min_height: Height,
    ) -> Result<Vec<SystemEvent>, IndexerError> {
        Ok(lock(&self.system_events)
            .values()
            .filter(|e| {
                e.actor == actor
                    && e.height >= min_height
                    && (kinds.is_empty() || kinds.contains(&e.kind))
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RawHeightStore for InMemoryStorage {
    async fn save(&self, data: &RawHeightData) -> Result<(), IndexerError> {
        lock(&self.raw_heights).insert(data.height, data.clone());
        Ok(())
    }

    async fn find_by_height(&self, height: Height) -> Result<Option<RawHeightData>, IndexerError> {
        Ok(lock(&self.raw_heights).get(&height).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn syncable(height: Height, version: u64, processed: bool) -> Syncable {
        let now = Utc::now();
        Syncable {
            height,
            time: now,
            epoch: 1,
            last_in_epoch: false,
            index_version: version,
            report_id: None,
            started_at: now,
            processed_at: processed.then_some(now),
            duration_ms: 0,
        }
    }

    fn vseq(height: Height, address: &str, signed: bool) -> ValidatorSeq {
        ValidatorSeq {
            height,
            time: Utc::now(),
            address: address.into(),
            name: String::new(),
            affiliation: String::new(),
            score: 1.0,
            signed,
        }
    }

    #[tokio::test]
    async fn syncable_version_lookups() {
        let store = InMemoryStorage::new();
        for (h, v) in [(1, 1), (2, 2), (3, 1), (4, 2)] {
            store.create_or_update(&syncable(h, v, true)).await.unwrap();
        }
        assert_eq!(store.find_smallest_index_version().await.unwrap(), Some(1));
        let first = store.find_first_by_different_index_version(2).await.unwrap().unwrap();
        assert_eq!(first.height, 1);
        let last = store
            .find_most_recent_by_different_index_version(2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.height, 3);
        assert!(store
            .find_first_by_different_index_version(3)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn most_recent_processed_skips_pending_heights() {
        let store = InMemoryStorage::new();
        store.create_or_update(&syncable(10, 1, true)).await.unwrap();
        store.create_or_update(&syncable(11, 1, false)).await.unwrap();
        let recent = SyncableStore::find_most_recent(&store).await.unwrap().unwrap();
        assert_eq!(recent.height, 11);
        let processed = store.find_most_recent_processed().await.unwrap().unwrap();
        assert_eq!(processed.height, 10);
    }

    #[tokio::test]
    async fn range_reset_clears_processed_at() {
        let store = InMemoryStorage::new();
        for h in 1..=5 {
            store.create_or_update(&syncable(h, 1, true)).await.unwrap();
        }
        let touched = store.set_processed_at_for_range(7, 2, 4).await.unwrap();
        assert_eq!(touched, 3);
        let s3 = SyncableStore::find_by_height(&store, 3).await.unwrap().unwrap();
        assert!(!s3.is_processed());
        assert_eq!(s3.report_id, Some(7));
        let s5 = SyncableStore::find_by_height(&store, 5).await.unwrap().unwrap();
        assert!(s5.is_processed());
    }

    #[tokio::test]
    async fn reports_get_sequential_ids_and_pending_lookup() {
        let store = InMemoryStorage::new();
        let a = store
            .create(Report::new(ReportKind::SequentialReindex, 2, 1, 10))
            .await
            .unwrap();
        let b = store.create(Report::new(ReportKind::Index, 2, 11, 20)).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let pending = store
            .find_not_completed_by_index_version(2, &ReportKind::REINDEX)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.id, a.id);

        let removed = store.delete_not_completed_by_kinds(&ReportKind::REINDEX).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.all_reports().len(), 1);
    }

    #[tokio::test]
    async fn saving_unknown_report_is_not_found() {
        let store = InMemoryStorage::new();
        let mut r = Report::new(ReportKind::Index, 1, 1, 1);
        r.id = 42;
        assert!(matches!(ReportStore::save(&store, &r).await, Err(IndexerError::NotFound(_))));
    }

    #[tokio::test]
    async fn last_by_address_is_most_recent_first_and_strictly_below() {
        let store = InMemoryStorage::new();
        let seqs: Vec<_> = (1..=6).map(|h| vseq(h, "v1", h % 2 == 0)).collect();
        ValidatorSeqStore::bulk_upsert(&store, &seqs).await.unwrap();
        ValidatorSeqStore::bulk_upsert(&store, &[vseq(3, "v2", true)])
            .await
            .unwrap();

        let found = store.find_last_by_address("v1", 5, 3).await.unwrap();
        let heights: Vec<_> = found.iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn retention_deletes_old_block_sequences() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        let seq = |height, time| BlockSeq {
            height,
            time,
            hash: format!("0x{height}"),
            tx_count: 0,
            size: 0,
            gas_used: 0,
            gas_limit: 0,
        };
        BlockSeqStore::upsert(&store, &seq(1, now - Duration::hours(48)))
            .await
            .unwrap();
        BlockSeqStore::upsert(&store, &seq(2, now)).await.unwrap();
        let removed = BlockSeqStore::delete_older_than(&store, now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(BlockSeqStore::find_by_height(&store, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn system_events_upsert_by_key() {
        let store = InMemoryStorage::new();
        let ev = |kind, data: serde_json::Value| SystemEvent {
            height: 10,
            time: Utc::now(),
            actor: "v1".into(),
            kind,
            data,
        };
        SystemEventStore::bulk_upsert(
            &store,
            &[ev(SystemEventKind::MissedNofM, serde_json::json!({"n": 1}))],
        )
        .await
        .unwrap();
        SystemEventStore::bulk_upsert(
            &store,
            &[
                ev(SystemEventKind::MissedNofM, serde_json::json!({"n": 2})),
                ev(SystemEventKind::LeftActiveSet, serde_json::Value::Null),
            ])
            .await
            .unwrap();
        assert_eq!(store.system_event_count(), 2);

        let missed = store
            .find_by_actor("v1", &[SystemEventKind::MissedNofM], 0)
            .await
            .unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].data["n"], 2);
        assert_eq!(store.find_by_actor("v1", &[], 11).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn create_many_keeps_existing_jobs() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        let mut done = Job::new(1, now);
        done.finished_at = Some(now);
        store.update(&done).await.unwrap();
        store.create_many(&[Job::new(1, now), Job::new(2, now)]).await.unwrap();

        let unfinished = store.find_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].height, 2);
        assert_eq!(store.find_last().await.unwrap().unwrap().height, 2);
    }
}
