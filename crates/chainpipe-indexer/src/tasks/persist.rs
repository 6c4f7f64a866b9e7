//! Persist stage: write everything the height produced.
//!
//! Persistors never patch the payload. Dry runs skip this whole stage.

use std::sync::Arc;

use async_trait::async_trait;

use chainpipe_core::error::IndexerError;
use chainpipe_core::pipeline::{Patch, RunContext, Task};
use chainpipe_core::store::{
    AccountActivitySeqStore, BlockSeqStore, GovernanceActivitySeqStore, ProposalAggStore,
    Store, SyncableStore, SystemEventStore, ValidatorAggStore, ValidatorGroupAggStore,
    ValidatorGroupSeqStore, ValidatorSeqStore,
};

use super::*;
use crate::payload::Payload;

/// Defines a persistor task holding one store handle.
///
/// `$body` sees the store handle and the payload and evaluates to the number
/// of records written; store errors propagate with `?`.
macro_rules! persistor {
    ($name:ident, $task:expr, $store:ident: $store_ty:ty, |$s:ident, $p:ident| $body:expr) => {
        pub struct $name {
            $store: Arc<$store_ty>,
        }

        impl $name {
            pub fn new($store: Arc<$store_ty>) -> Self {
                Self { $store }
            }
        }

        #[async_trait]
        impl Task<Payload> for $name {
            fn name(&self) -> &'static str {
                $task
            }

            async fn run(&self, ctx: &RunContext, $p: &Payload) -> Result<Patch<Payload>, IndexerError> {
                let $s = &self.$store;
                let written: usize = $body;
                if written > 0 {
                    tracing::trace!(task = $task, height = ctx.height(), written, "records persisted");
                }
                Ok(Patch::none())
            }
        }
    };
}

persistor!(SyncerPersistor, SYNCER_PERSISTOR, syncables: dyn SyncableStore, |s, p| {
    let syncable = p
        .syncable
        .as_ref()
        .ok_or_else(|| IndexerError::validation("syncable", "not created for height"))?;
    s.create_or_update(syncable).await?;
    1
});

persistor!(BlockSeqPersistor, BLOCK_SEQ_PERSISTOR, block_seqs: dyn BlockSeqStore, |s, p| {
    match &p.sequences.block {
        Some(seq) => {
            s.upsert(seq).await?;
            1
        }
        None => 0,
    }
});

persistor!(ValidatorSeqPersistor, VALIDATOR_SEQ_PERSISTOR, validator_seqs: dyn ValidatorSeqStore, |s, p| {
    match p.sequences.validators.as_deref() {
        Some(seqs) if !seqs.is_empty() => {
            s.bulk_upsert(seqs).await?;
            seqs.len()
        }
        _ => 0,
    }
});

persistor!(ValidatorGroupSeqPersistor, VALIDATOR_GROUP_SEQ_PERSISTOR, validator_group_seqs: dyn ValidatorGroupSeqStore, |s, p| {
    match p.sequences.validator_groups.as_deref() {
        Some(seqs) if !seqs.is_empty() => {
            s.bulk_upsert(seqs).await?;
            seqs.len()
        }
        _ => 0,
    }
});

persistor!(AccountActivitySeqPersistor, ACCOUNT_ACTIVITY_SEQ_PERSISTOR, account_activity_seqs: dyn AccountActivitySeqStore, |s, p| {
    match p.sequences.account_activity.as_deref() {
        Some(seqs) if !seqs.is_empty() => {
            s.bulk_upsert(seqs).await?;
            seqs.len()
        }
        _ => 0,
    }
});

persistor!(GovernanceActivitySeqPersistor, GOVERNANCE_ACTIVITY_SEQ_PERSISTOR, governance_activity_seqs: dyn GovernanceActivitySeqStore, |s, p| {
    match p.sequences.governance_activity.as_deref() {
        Some(seqs) if !seqs.is_empty() => {
            s.bulk_upsert(seqs).await?;
            seqs.len()
        }
        _ => 0,
    }
});

persistor!(ValidatorAggPersistor, VALIDATOR_AGG_PERSISTOR, validator_aggs: dyn ValidatorAggStore, |s, p| {
    for agg in &p.aggregates.validators {
        s.upsert(agg).await?;
    }
    p.aggregates.validators.len()
});

persistor!(ValidatorGroupAggPersistor, VALIDATOR_GROUP_AGG_PERSISTOR, validator_group_aggs: dyn ValidatorGroupAggStore, |s, p| {
    for agg in &p.aggregates.validator_groups {
        s.upsert(agg).await?;
    }
    p.aggregates.validator_groups.len()
});

persistor!(ProposalAggPersistor, PROPOSAL_AGG_PERSISTOR, proposal_aggs: dyn ProposalAggStore, |s, p| {
    for agg in &p.aggregates.proposals {
        s.upsert(agg).await?;
    }
    p.aggregates.proposals.len()
});

persistor!(SystemEventPersistor, SYSTEM_EVENT_PERSISTOR, system_events: dyn SystemEventStore, |s, p| {
    if !p.system_events.is_empty() {
        s.bulk_upsert(&p.system_events).await?;
    }
    p.system_events.len()
});

/// Every persistor, in declaration order.
pub fn persistors(store: &Store) -> Vec<Arc<dyn Task<Payload>>> {
    vec![
        Arc::new(SyncerPersistor::new(store.syncables.clone())),
        Arc::new(BlockSeqPersistor::new(store.block_seqs.clone())),
        Arc::new(ValidatorSeqPersistor::new(store.validator_seqs.clone())),
        Arc::new(ValidatorGroupSeqPersistor::new(store.validator_group_seqs.clone())),
        Arc::new(AccountActivitySeqPersistor::new(store.account_activity_seqs.clone())),
        Arc::new(GovernanceActivitySeqPersistor::new(store.governance_activity_seqs.clone())),
        Arc::new(ValidatorAggPersistor::new(store.validator_aggs.clone())),
        Arc::new(ValidatorGroupAggPersistor::new(store.validator_group_aggs.clone())),
        Arc::new(ProposalAggPersistor::new(store.proposal_aggs.clone())),
        Arc::new(SystemEventPersistor::new(store.system_events.clone())),
    ]
}
