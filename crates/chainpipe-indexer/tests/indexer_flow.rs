//! End-to-end runs of the indexer use cases against the in-memory backend
//! and a deterministic chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use chainpipe_core::client::ChainClient;
use chainpipe_core::config::IndexerConfig;
use chainpipe_core::error::IndexerError;
use chainpipe_core::model::ReportKind;
use chainpipe_core::store::{BlockSeqStore, Store, SyncableStore, ValidatorAggStore};
use chainpipe_core::types::*;
use chainpipe_core::version::VersionConfig;
use chainpipe_indexer::{BackfillRequest, IndexRequest, Indexer, IndexerBuilder, RunHeightRequest};
use chainpipe_storage::InMemoryStorage;

// ─── Mock chain ───────────────────────────────────────────────────────────────

struct MockChain {
    head: AtomicU64,
    /// Heights at which `block` fails permanently.
    broken_height: Option<Height>,
    requests: AtomicU64,
}

impl MockChain {
    fn new(head: Height) -> Self {
        Self {
            head: AtomicU64::new(head),
            broken_height: None,
            requests: AtomicU64::new(0),
        }
    }

    fn tick(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }
}

fn time(height: Height) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + height as i64 * 5, 0)
        .single()
        .unwrap()
}

#[async_trait]
impl ChainClient for MockChain {
    async fn status(&self) -> Result<ChainStatus, IndexerError> {
        let head = self.head.load(Ordering::Relaxed);
        Ok(ChainStatus {
            chain_id: 42220,
            latest_height: head,
            latest_time: time(head),
        })
    }

    async fn params(&self) -> Result<ChainParams, IndexerError> {
        Ok(ChainParams {
            chain_id: 42220,
            epoch_size: 10,
        })
    }

    async fn height_meta(&self, height: Height) -> Result<HeightMeta, IndexerError> {
        self.tick();
        Ok(HeightMeta {
            height,
            time: time(height),
            epoch: height / 10,
            epoch_size: 10,
            last_in_epoch: height % 10 == 0,
        })
    }

    async fn block(&self, height: Height) -> Result<RawBlock, IndexerError> {
        self.tick();
        if self.broken_height == Some(height) {
            return Err(IndexerError::Other(format!("corrupt block {height}")));
        }
        Ok(RawBlock {
            height,
            hash: format!("0x{height:064x}"),
            parent_hash: format!("0x{:064x}", height - 1),
            time: time(height),
            size: 2_000,
            gas_used: 50,
            gas_limit: 100,
            tx_count: 0,
        })
    }

    async fn validators(&self, height: Height) -> Result<Vec<RawValidator>, IndexerError> {
        self.tick();
        let validator = |address: &str, signed: bool| RawValidator {
            address: address.into(),
            name: address.trim_start_matches("0x").into(),
            metadata_url: String::new(),
            signer: address.into(),
            affiliation: "0xgroup".into(),
            score: 0.9,
            signed,
        };
        Ok(vec![
            validator("0xval1", true),
            validator("0xval2", height % 2 == 0),
        ])
    }

    async fn validator_groups(&self, _height: Height) -> Result<Vec<RawValidatorGroup>, IndexerError> {
        self.tick();
        Ok(vec![RawValidatorGroup {
            address: "0xgroup".into(),
            name: "group".into(),
            metadata_url: String::new(),
            commission: 0.1,
            active_votes: 1_000,
            pending_votes: 0,
            voting_cap: 5_000,
            members: vec!["0xval1".into(), "0xval2".into()],
        }])
    }

    async fn transactions(&self, _height: Height) -> Result<Vec<RawTransaction>, IndexerError> {
        self.tick();
        Ok(vec![])
    }

    async fn identity(&self, _address: &str, _height: Height) -> Result<Option<Identity>, IndexerError> {
        Ok(None)
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

const TARGETS: &str = r#"
    "shared_tasks": [
        "HeightMetaRetriever", "BlockFetcher", "ValidatorsFetcher", "ValidatorGroupsFetcher",
        "TransactionsFetcher", "Parser", "MainSyncer", "SyncerPersistor"
    ],
    "available_targets": [
        { "id": 1, "name": "sequences", "tasks": [
            "BlockSeqCreator", "ValidatorSeqCreator", "ValidatorGroupSeqCreator",
            "BlockSeqPersistor", "ValidatorSeqPersistor", "ValidatorGroupSeqPersistor"
        ] },
        { "id": 2, "name": "aggregates", "tasks": [
            "ValidatorAggCreator", "ValidatorGroupAggCreator",
            "ValidatorAggPersistor", "ValidatorGroupAggPersistor"
        ] },
        { "id": 3, "name": "events", "tasks": [
            "AccountActivitySeqCreator", "AccountActivitySeqPersistor",
            "SystemEventCreator", "SystemEventPersistor"
        ] }
    ]"#;

fn v1_only() -> VersionConfig {
    VersionConfig::from_json(&format!(r#"{{ "versions": [{{ "id": 1, "targets": [1] }}], {TARGETS} }}"#))
        .unwrap()
}

fn v1_and_v2(sequential: bool) -> VersionConfig {
    VersionConfig::from_json(&format!(
        r#"{{ "versions": [
                {{ "id": 1, "targets": [1] }},
                {{ "id": 2, "targets": [2, 3], "sequential": {sequential} }}
            ], {TARGETS} }}"#
    ))
    .unwrap()
}

fn config() -> IndexerConfig {
    IndexerConfig {
        first_block_height: 1,
        default_batch_size: 10,
        task_retry_backoff_ms: 1,
        ..Default::default()
    }
}

fn indexer(store: &Store, chain: Arc<MockChain>, versions: VersionConfig) -> Indexer {
    IndexerBuilder::new()
        .config(config())
        .versions(versions)
        .client(chain)
        .store(store.clone())
        .build()
        .unwrap()
}

fn new_store() -> (Arc<InMemoryStorage>, Store) {
    let backend = Arc::new(InMemoryStorage::new());
    let store = Store::from_backend(backend.clone());
    (backend, store)
}

// ─── Index ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn index_runs_resume_in_batches_until_caught_up() {
    let (backend, store) = new_store();
    let idx = indexer(&store, Arc::new(MockChain::new(15)), v1_and_v2(false));
    let cancel = CancellationToken::new();

    let first = idx.start_index(&cancel, IndexRequest::default()).await.unwrap();
    assert_eq!((first.start_height, first.end_height), (1, 10));
    assert_eq!(first.success_count, 10);
    assert_eq!(first.version, 2);

    let second = idx.start_index(&cancel, IndexRequest::default()).await.unwrap();
    assert_eq!((second.start_height, second.end_height), (11, 15));

    let err = idx.start_index(&cancel, IndexRequest::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::NothingToProcess(_)));

    assert_eq!(backend.syncable_count(), 15);
    let tail = SyncableStore::find_most_recent(backend.as_ref()).await.unwrap().unwrap();
    assert!(tail.is_processed());
    assert_eq!(tail.index_version, 2);
    assert!(BlockSeqStore::find_by_height(backend.as_ref(), 7).await.unwrap().is_some());

    let reports = backend.all_reports();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_completed() && r.kind == ReportKind::Index));
    assert_eq!(idx.metrics().snapshot().heights_processed, 15);
}

#[tokio::test]
async fn failed_height_is_reported_and_retried_next_run() {
    let (backend, store) = new_store();
    let chain = MockChain {
        broken_height: Some(4),
        ..MockChain::new(8)
    };
    let idx = indexer(&store, Arc::new(chain), v1_only());
    let cancel = CancellationToken::new();

    let err = idx.start_index(&cancel, IndexRequest::default()).await.unwrap_err();
    assert!(err.to_string().contains("corrupt block 4"));

    let report = backend.all_reports().pop().unwrap();
    assert!(report.is_completed());
    assert_eq!(report.success_count, Some(3));
    assert_eq!(report.error_count, Some(5));
    assert!(report.error_msg.unwrap().contains("corrupt block 4"));

    let healthy = indexer(&store, Arc::new(MockChain::new(8)), v1_only());
    let summary = healthy.start_index(&cancel, IndexRequest::default()).await.unwrap();
    assert_eq!(summary.start_height, 4);
    assert_eq!(backend.syncable_count(), 8);
}

#[tokio::test]
async fn explicit_batch_and_start_height_override_defaults() {
    let (_backend, store) = new_store();
    let idx = indexer(&store, Arc::new(MockChain::new(100)), v1_only());
    let summary = idx
        .start_index(
            &CancellationToken::new(),
            IndexRequest {
                batch_size: Some(3),
                start_height: Some(50),
            },
        )
        .await
        .unwrap();
    assert_eq!((summary.start_height, summary.end_height), (50, 52));
}

// ─── Backfill ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn backfill_on_empty_store_is_refused() {
    let (_backend, store) = new_store();
    let idx = indexer(&store, Arc::new(MockChain::new(10)), v1_and_v2(false));
    let err = idx
        .backfill(&CancellationToken::new(), BackfillRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::DatabaseEmpty));
}

#[tokio::test]
async fn backfill_migrates_outdated_heights_to_current_version() {
    let (backend, store) = new_store();
    let chain = Arc::new(MockChain::new(5));
    let cancel = CancellationToken::new();
    indexer(&store, chain.clone(), v1_only())
        .start_index(&cancel, IndexRequest::default())
        .await
        .unwrap();
    assert!(ValidatorAggStore::find_by_address(backend.as_ref(), "0xval1")
        .await
        .unwrap()
        .is_none());

    let upgraded = indexer(&store, chain, v1_and_v2(false));
    let status = upgraded.version_status().await.unwrap();
    assert_eq!(status.missing_versions, vec![2]);

    let summary = upgraded.backfill(&cancel, BackfillRequest::default()).await.unwrap();
    assert_eq!(summary.kind, ReportKind::SequentialReindex);
    assert_eq!((summary.start_height, summary.end_height), (1, 5));
    assert_eq!(summary.success_count, 5);

    assert!(upgraded.version_status().await.unwrap().is_up_to_date());
    let agg = ValidatorAggStore::find_by_address(backend.as_ref(), "0xval1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agg.recent_as_of_height, 5);

    let err = upgraded.backfill(&cancel, BackfillRequest::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::NothingToProcess(_)));
}

#[tokio::test]
async fn pending_sequential_version_gates_index_and_parallel_backfill() {
    let (_backend, store) = new_store();
    let chain = Arc::new(MockChain::new(5));
    let cancel = CancellationToken::new();
    indexer(&store, chain.clone(), v1_only())
        .start_index(&cancel, IndexRequest::default())
        .await
        .unwrap();

    let upgraded = indexer(&store, chain, v1_and_v2(true));
    let err = upgraded.start_index(&cancel, IndexRequest::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::SequentialVersionPending { .. }));

    let err = upgraded
        .backfill(
            &cancel,
            BackfillRequest {
                parallel: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::SequentialVersionPending { ref run, .. } if run == "parallel reindex"));

    upgraded.backfill(&cancel, BackfillRequest::default()).await.unwrap();
    let err = upgraded.start_index(&cancel, IndexRequest::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::NothingToProcess(_)));
}

#[tokio::test]
async fn open_reindex_of_other_kind_requires_force() {
    let (backend, store) = new_store();
    let chain = Arc::new(MockChain::new(5));
    let cancel = CancellationToken::new();
    indexer(&store, chain.clone(), v1_only())
        .start_index(&cancel, IndexRequest::default())
        .await
        .unwrap();

    // A parallel reindex that never completed.
    store
        .reports
        .create(chainpipe_core::model::Report::new(ReportKind::ParallelReindex, 2, 1, 5))
        .await
        .unwrap();

    let upgraded = indexer(&store, chain, v1_and_v2(false));
    let err = upgraded.backfill(&cancel, BackfillRequest::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::ReindexInProgress { ref kind } if kind == "parallel_reindex"));

    let summary = upgraded
        .backfill(
            &cancel,
            BackfillRequest {
                force: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.kind, ReportKind::SequentialReindex);
    assert!(backend
        .all_reports()
        .iter()
        .all(|r| r.kind != ReportKind::ParallelReindex));
}

#[tokio::test]
async fn unknown_backfill_target_leaves_store_untouched() {
    let (backend, store) = new_store();
    let chain = Arc::new(MockChain::new(5));
    let cancel = CancellationToken::new();
    indexer(&store, chain.clone(), v1_only())
        .start_index(&cancel, IndexRequest::default())
        .await
        .unwrap();

    let upgraded = indexer(&store, chain, v1_and_v2(false));
    let err = upgraded
        .backfill(
            &cancel,
            BackfillRequest {
                target_ids: vec![99],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::Config(_)));

    assert!(backend.all_reports().iter().all(|r| r.kind == ReportKind::Index));
    for height in 1..=5 {
        let syncable = SyncableStore::find_by_height(backend.as_ref(), height)
            .await
            .unwrap()
            .unwrap();
        assert!(syncable.processed_at.is_some(), "height {height} was reset");
    }

    // Nothing left open to block a reindex of the other kind.
    let summary = upgraded
        .backfill(
            &cancel,
            BackfillRequest {
                parallel: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.kind, ReportKind::ParallelReindex);
    assert_eq!(summary.success_count, 5);
}

// ─── Single height / purge / status ───────────────────────────────────────────

#[tokio::test]
async fn dry_run_height_persists_nothing() {
    let (backend, store) = new_store();
    let idx = indexer(&store, Arc::new(MockChain::new(10)), v1_and_v2(false));
    let payload = idx
        .run_height(
            &CancellationToken::new(),
            RunHeightRequest {
                height: 6,
                dry: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(payload.sequences.block.is_some());
    assert_eq!(payload.sequences.validators.as_ref().map(Vec::len), Some(2));
    assert_eq!(backend.syncable_count(), 0);
    assert!(BlockSeqStore::find_by_height(backend.as_ref(), 6).await.unwrap().is_none());
}

#[tokio::test]
async fn targeted_height_run_commits_only_selected_tasks() {
    let (backend, store) = new_store();
    let idx = indexer(&store, Arc::new(MockChain::new(10)), v1_and_v2(false));
    let payload = idx
        .run_height(
            &CancellationToken::new(),
            RunHeightRequest {
                height: 6,
                target_ids: vec![2],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(payload.sequences.block.is_none());
    assert!(!payload.aggregates.validators.is_empty());
    let syncable = SyncableStore::find_by_height(backend.as_ref(), 6).await.unwrap().unwrap();
    assert!(syncable.is_processed());
}

#[tokio::test]
async fn purge_drops_sequences_past_retention() {
    let (backend, store) = new_store();
    let idx = indexer(&store, Arc::new(MockChain::new(4)), v1_only());
    idx.start_index(&CancellationToken::new(), IndexRequest::default())
        .await
        .unwrap();

    // Mock heights are timestamped in 2023, far past the default retention.
    let summary = idx.purge().await.unwrap();
    assert_eq!(summary.block_seqs, 4);
    assert_eq!(summary.validator_seqs, 8);
    assert_eq!(summary.validator_group_seqs, 4);
    assert!(BlockSeqStore::find_by_height(backend.as_ref(), 2).await.unwrap().is_none());
}

#[tokio::test]
async fn status_reports_progress() {
    let (_backend, store) = new_store();
    let idx = indexer(&store, Arc::new(MockChain::new(3)), v1_only());
    idx.start_index(&CancellationToken::new(), IndexRequest::default())
        .await
        .unwrap();

    let status = idx.status().await.unwrap();
    assert_eq!(status.chain.latest_height, 3);
    assert_eq!(status.most_recent_processed.map(|s| s.height), Some(3));
    assert!(status.versions.is_up_to_date());
    assert_eq!(status.last_report.map(|r| r.kind), Some(ReportKind::Index));
    assert_eq!(status.metrics.heights_processed, 3);
}
