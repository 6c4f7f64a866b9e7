//! Concrete tasks, grouped by stage, and the stage layout they run in.
//!
//! | Stage     | Kind       | Tasks |
//! |-----------|------------|-------|
//! | Setup     | sequential | `HeightMetaRetriever` |
//! | Fetch     | concurrent | `BlockFetcher`, `ValidatorsFetcher`, `ValidatorGroupsFetcher`, `TransactionsFetcher` |
//! | Parse     | sequential | `Parser` |
//! | Sync      | sequential | `MainSyncer` |
//! | Sequence  | concurrent | one creator per sequence kind |
//! | Aggregate | concurrent | one creator per aggregate kind |
//! | Analyze   | sequential | `SystemEventCreator` |
//! | Persist   | concurrent | `SyncerPersistor`, one persistor per sequence/aggregate kind, `SystemEventPersistor` |

pub mod aggregate;
pub mod analyze;
pub mod fetch;
pub mod parse;
pub mod persist;
pub mod sequence;
pub mod sync;

use std::sync::Arc;

use chainpipe_core::client::ChainClient;
use chainpipe_core::config::AnalyzerConfig;
use chainpipe_core::error::IndexerError;
use chainpipe_core::pipeline::{Stage, StageName, Task};
use chainpipe_core::store::Store;
use chainpipe_core::types::Height;

use crate::payload::Payload;

// ─── Task names ───────────────────────────────────────────────────────────────

pub const HEIGHT_META_RETRIEVER: &str = "HeightMetaRetriever";
pub const BLOCK_FETCHER: &str = "BlockFetcher";
pub const VALIDATORS_FETCHER: &str = "ValidatorsFetcher";
pub const VALIDATOR_GROUPS_FETCHER: &str = "ValidatorGroupsFetcher";
pub const TRANSACTIONS_FETCHER: &str = "TransactionsFetcher";
pub const PARSER: &str = "Parser";
pub const MAIN_SYNCER: &str = "MainSyncer";

pub const BLOCK_SEQ_CREATOR: &str = "BlockSeqCreator";
pub const VALIDATOR_SEQ_CREATOR: &str = "ValidatorSeqCreator";
pub const VALIDATOR_GROUP_SEQ_CREATOR: &str = "ValidatorGroupSeqCreator";
pub const ACCOUNT_ACTIVITY_SEQ_CREATOR: &str = "AccountActivitySeqCreator";
pub const GOVERNANCE_ACTIVITY_SEQ_CREATOR: &str = "GovernanceActivitySeqCreator";

pub const VALIDATOR_AGG_CREATOR: &str = "ValidatorAggCreator";
pub const VALIDATOR_GROUP_AGG_CREATOR: &str = "ValidatorGroupAggCreator";
pub const PROPOSAL_AGG_CREATOR: &str = "ProposalAggCreator";

pub const SYSTEM_EVENT_CREATOR: &str = "SystemEventCreator";

pub const SYNCER_PERSISTOR: &str = "SyncerPersistor";
pub const BLOCK_SEQ_PERSISTOR: &str = "BlockSeqPersistor";
pub const VALIDATOR_SEQ_PERSISTOR: &str = "ValidatorSeqPersistor";
pub const VALIDATOR_GROUP_SEQ_PERSISTOR: &str = "ValidatorGroupSeqPersistor";
pub const ACCOUNT_ACTIVITY_SEQ_PERSISTOR: &str = "AccountActivitySeqPersistor";
pub const GOVERNANCE_ACTIVITY_SEQ_PERSISTOR: &str = "GovernanceActivitySeqPersistor";
pub const VALIDATOR_AGG_PERSISTOR: &str = "ValidatorAggPersistor";
pub const VALIDATOR_GROUP_AGG_PERSISTOR: &str = "ValidatorGroupAggPersistor";
pub const PROPOSAL_AGG_PERSISTOR: &str = "ProposalAggPersistor";
pub const SYSTEM_EVENT_PERSISTOR: &str = "SystemEventPersistor";

/// Tasks that run at every index version.
pub const SHARED_TASKS: &[&str] = &[
    HEIGHT_META_RETRIEVER,
    BLOCK_FETCHER,
    VALIDATORS_FETCHER,
    VALIDATOR_GROUPS_FETCHER,
    TRANSACTIONS_FETCHER,
    PARSER,
    MAIN_SYNCER,
    SYNCER_PERSISTOR,
];

// ─── Wiring ───────────────────────────────────────────────────────────────────

/// Collaborators the concrete tasks are built from.
#[derive(Clone)]
pub struct TaskDeps {
    pub client: Arc<dyn ChainClient>,
    pub store: Store,
    pub analyzer: AnalyzerConfig,
}

/// Build every stage in execution order.
pub fn build_stages(deps: &TaskDeps) -> Result<Vec<Stage<Payload>>, IndexerError> {
    let client = &deps.client;
    let store = &deps.store;

    let setup: Vec<Arc<dyn Task<Payload>>> = vec![Arc::new(fetch::HeightMetaRetriever::new(
        client.clone(),
        store.raw_heights.clone(),
    ))];

    let fetch: Vec<Arc<dyn Task<Payload>>> = vec![
        Arc::new(fetch::BlockFetcher::new(client.clone())),
        Arc::new(fetch::ValidatorsFetcher::new(client.clone())),
        Arc::new(fetch::ValidatorGroupsFetcher::new(client.clone())),
        Arc::new(fetch::TransactionsFetcher::new(client.clone())),
    ];

    let parse: Vec<Arc<dyn Task<Payload>>> = vec![Arc::new(parse::Parser::new(client.clone()))];

    let sync: Vec<Arc<dyn Task<Payload>>> = vec![Arc::new(sync::MainSyncer)];

    let sequence: Vec<Arc<dyn Task<Payload>>> = vec![
        Arc::new(sequence::BlockSeqCreator),
        Arc::new(sequence::ValidatorSeqCreator),
        Arc::new(sequence::ValidatorGroupSeqCreator),
        Arc::new(sequence::AccountActivitySeqCreator),
        Arc::new(sequence::GovernanceActivitySeqCreator),
    ];

    let aggregate: Vec<Arc<dyn Task<Payload>>> = vec![
        Arc::new(aggregate::ValidatorAggCreator::new(store.validator_aggs.clone())),
        Arc::new(aggregate::ValidatorGroupAggCreator::new(
            store.validator_group_aggs.clone(),
        )),
        Arc::new(aggregate::ProposalAggCreator::new(store.proposal_aggs.clone())),
    ];

    let analyze: Vec<Arc<dyn Task<Payload>>> = vec![Arc::new(analyze::SystemEventCreator::new(
        store.clone(),
        deps.analyzer.clone(),
    ))];

    Ok(vec![
        Stage::sequential(StageName::Setup, setup),
        Stage::concurrent(StageName::Fetch, fetch)?,
        Stage::sequential(StageName::Parse, parse),
        Stage::sequential(StageName::Sync, sync),
        Stage::concurrent(StageName::Sequence, sequence)?,
        Stage::concurrent(StageName::Aggregate, aggregate)?,
        Stage::sequential(StageName::Analyze, analyze),
        Stage::concurrent(StageName::Persist, persist::persistors(store))?,
    ])
}

/// Keep going without the value when the data simply does not exist yet at
/// this height; every other error fails the task.
pub(crate) fn tolerate_partial<T>(
    task: &'static str,
    height: Height,
    result: Result<T, IndexerError>,
) -> Result<Option<T>, IndexerError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_partial_data() => {
            tracing::warn!(task, height, error = %e, "partial data, field left empty");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Scripted chain client shared by task tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use chainpipe_core::client::ChainClient;
    use chainpipe_core::error::IndexerError;
    use chainpipe_core::types::*;

    #[derive(Default)]
    pub struct ScriptedClient {
        pub validators: HashMap<Height, Vec<RawValidator>>,
        pub identities: HashMap<String, Identity>,
        pub not_deployed: bool,
        pub requests: AtomicU64,
    }

    pub fn time(height: Height) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + height as i64 * 5, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    #[async_trait]
    impl ChainClient for ScriptedClient {
        async fn status(&self) -> Result<ChainStatus, IndexerError> {
            Ok(ChainStatus {
                chain_id: 42220,
                latest_height: 100,
                latest_time: time(100),
            })
        }

        async fn params(&self) -> Result<ChainParams, IndexerError> {
            Ok(ChainParams {
                chain_id: 42220,
                epoch_size: 10,
            })
        }

        async fn height_meta(&self, height: Height) -> Result<HeightMeta, IndexerError> {
            self.requests.fetch_add(1, Ordering::Relaxed);
            Ok(HeightMeta {
                height,
                time: time(height),
                epoch: height / 10,
                epoch_size: 10,
                last_in_epoch: height % 10 == 0,
            })
        }

        async fn block(&self, height: Height) -> Result<RawBlock, IndexerError> {
            self.requests.fetch_add(1, Ordering::Relaxed);
            Ok(RawBlock {
                height,
                hash: format!("0x{height:04x}"),
                parent_hash: format!("0x{:04x}", height.saturating_sub(1)),
                time: time(height),
                size: 1024,
                gas_used: 10,
                gas_limit: 100,
                tx_count: 0,
            })
        }

        async fn validators(&self, height: Height) -> Result<Vec<RawValidator>, IndexerError> {
            self.requests.fetch_add(1, Ordering::Relaxed);
            if self.not_deployed {
                return Err(IndexerError::ContractNotDeployed {
                    contract: "Validators".into(),
                    height,
                });
            }
            Ok(self.validators.get(&height).cloned().unwrap_or_default())
        }

        async fn validator_groups(&self, _height: Height) -> Result<Vec<RawValidatorGroup>, IndexerError> {
            Ok(vec![])
        }

        async fn transactions(&self, _height: Height) -> Result<Vec<RawTransaction>, IndexerError> {
            Ok(vec![])
        }

        async fn identity(&self, address: &str, _height: Height) -> Result<Option<Identity>, IndexerError> {
            self.requests.fetch_add(1, Ordering::Relaxed);
            Ok(self.identities.get(address).cloned())
        }

        fn request_count(&self) -> u64 {
            self.requests.load(Ordering::Relaxed)
        }
    }
}
