//! Sequence stage: one time-series record per entity for the height.
//!
//! A sequence stays `None` when its raw input was not fetched, so persistors
//! can tell "nothing fetched" apart from "fetched, but empty".

use async_trait::async_trait;

use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{BlockSeq, ValidatorGroupSeq, ValidatorSeq};
use chainpipe_core::pipeline::{Patch, RunContext, Task};

use super::{
    ACCOUNT_ACTIVITY_SEQ_CREATOR, BLOCK_SEQ_CREATOR, GOVERNANCE_ACTIVITY_SEQ_CREATOR,
    VALIDATOR_GROUP_SEQ_CREATOR, VALIDATOR_SEQ_CREATOR,
};
use crate::payload::Payload;

pub struct BlockSeqCreator;

#[async_trait]
impl Task<Payload> for BlockSeqCreator {
    fn name(&self) -> &'static str {
        BLOCK_SEQ_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["sequences.block"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let Some(block) = &payload.raw.block else {
            return Ok(Patch::none());
        };
        let seq = BlockSeq {
            height: payload.height,
            time: block.time,
            hash: block.hash.clone(),
            tx_count: block.tx_count,
            size: block.size,
            gas_used: block.gas_used,
            gas_limit: block.gas_limit,
        };
        seq.validate()?;
        Ok(Patch::new(move |p: &mut Payload| p.sequences.block = Some(seq)))
    }
}

pub struct ValidatorSeqCreator;

#[async_trait]
impl Task<Payload> for ValidatorSeqCreator {
    fn name(&self) -> &'static str {
        VALIDATOR_SEQ_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["sequences.validators"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        if payload.raw.validators.is_none() {
            return Ok(Patch::none());
        }
        let time = payload.time();
        let seqs = payload
            .parsed
            .validators
            .iter()
            .map(|v| {
                let seq = ValidatorSeq {
                    height: payload.height,
                    time,
                    address: v.address.clone(),
                    name: v.name.clone(),
                    affiliation: v.affiliation.clone(),
                    score: v.score,
                    signed: v.signed,
                };
                seq.validate().map(|_| seq)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Patch::new(move |p: &mut Payload| p.sequences.validators = Some(seqs)))
    }
}

pub struct ValidatorGroupSeqCreator;

#[async_trait]
impl Task<Payload> for ValidatorGroupSeqCreator {
    fn name(&self) -> &'static str {
        VALIDATOR_GROUP_SEQ_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["sequences.validator_groups"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        if payload.raw.validator_groups.is_none() {
            return Ok(Patch::none());
        }
        let time = payload.time();
        let mut seqs = Vec::with_capacity(payload.parsed.validator_groups.len());
        for parsed in &payload.parsed.validator_groups {
            let g = &parsed.group;
            let seq = ValidatorGroupSeq {
                height: payload.height,
                time,
                address: g.address.clone(),
                name: g.name.clone(),
                commission: g.commission,
                active_votes: g.active_votes,
                pending_votes: g.pending_votes,
                voting_cap: g.voting_cap,
                members_count: parsed.members_count,
                members_avg_signed: parsed.members_avg_signed,
            };
            seq.validate()?;
            seqs.push(seq);
        }
        Ok(Patch::new(move |p: &mut Payload| p.sequences.validator_groups = Some(seqs)))
    }
}

pub struct AccountActivitySeqCreator;

#[async_trait]
impl Task<Payload> for AccountActivitySeqCreator {
    fn name(&self) -> &'static str {
        ACCOUNT_ACTIVITY_SEQ_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["sequences.account_activity"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        if payload.raw.transactions.is_none() {
            return Ok(Patch::none());
        }
        for seq in &payload.parsed.account_activity {
            seq.validate()?;
        }
        let seqs = payload.parsed.account_activity.clone();
        Ok(Patch::new(move |p: &mut Payload| p.sequences.account_activity = Some(seqs)))
    }
}

pub struct GovernanceActivitySeqCreator;

#[async_trait]
impl Task<Payload> for GovernanceActivitySeqCreator {
    fn name(&self) -> &'static str {
        GOVERNANCE_ACTIVITY_SEQ_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["sequences.governance_activity"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        if payload.raw.transactions.is_none() {
            return Ok(Patch::none());
        }
        for seq in &payload.parsed.governance_activity {
            seq.validate()?;
        }
        let seqs = payload.parsed.governance_activity.clone();
        Ok(Patch::new(move |p: &mut Payload| p.sequences.governance_activity = Some(seqs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpipe_core::types::{RawBlock, RawValidator};
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> RunContext {
        RunContext::new(5, CancellationToken::new())
    }

    #[tokio::test]
    async fn missing_raw_data_leaves_sequence_unset() {
        let mut payload = Payload::new(5, 1, None);
        let patch = ValidatorSeqCreator.run(&ctx(), &payload).await.unwrap();
        assert!(patch.is_empty());
        patch.apply(&mut payload);
        assert!(payload.sequences.validators.is_none());
    }

    #[tokio::test]
    async fn block_sequence_built_from_raw_block() {
        let mut payload = Payload::new(5, 1, None);
        payload.raw.block = Some(RawBlock {
            height: 5,
            hash: "0x05".into(),
            parent_hash: "0x04".into(),
            time: Utc::now(),
            size: 512,
            gas_used: 7,
            gas_limit: 10,
            tx_count: 2,
        });
        BlockSeqCreator.run(&ctx(), &payload).await.unwrap().apply(&mut payload);
        let seq = payload.sequences.block.unwrap();
        assert_eq!(seq.hash, "0x05");
        assert_eq!(seq.tx_count, 2);
    }

    #[tokio::test]
    async fn invalid_validator_fails_the_height() {
        let mut payload = Payload::new(5, 1, None);
        payload.raw.validators = Some(vec![]);
        payload.parsed.validators = vec![RawValidator {
            address: String::new(),
            name: String::new(),
            metadata_url: String::new(),
            signer: String::new(),
            affiliation: String::new(),
            score: 0.5,
            signed: true,
        }];
        let err = ValidatorSeqCreator.run(&ctx(), &payload).await.unwrap_err();
        assert!(matches!(err, IndexerError::Validation { .. }));
    }
}
