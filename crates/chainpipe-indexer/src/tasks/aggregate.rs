//! Aggregate stage: fold the height into per-entity running summaries.
//!
//! Each creator loads the stored aggregate, creates one on first sight (the
//! entity "started" at this height) and refreshes its `recent_*` fields.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{GovernanceActivitySeq, ProposalAgg, ValidatorAgg, ValidatorGroupAgg};
use chainpipe_core::pipeline::{Patch, RunContext, Task};
use chainpipe_core::store::{ProposalAggStore, ValidatorAggStore, ValidatorGroupAggStore};
use chainpipe_core::types::Height;

use super::parse::{amount_field, str_field};
use super::{PROPOSAL_AGG_CREATOR, VALIDATOR_AGG_CREATOR, VALIDATOR_GROUP_AGG_CREATOR};
use crate::payload::Payload;

// ─── Validators ───────────────────────────────────────────────────────────────

pub struct ValidatorAggCreator {
    aggs: Arc<dyn ValidatorAggStore>,
}

impl ValidatorAggCreator {
    pub fn new(aggs: Arc<dyn ValidatorAggStore>) -> Self {
        Self { aggs }
    }
}

#[async_trait]
impl Task<Payload> for ValidatorAggCreator {
    fn name(&self) -> &'static str {
        VALIDATOR_AGG_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["aggregates.validators"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let (height, time) = (payload.height, payload.time());
        let mut aggs = Vec::with_capacity(payload.parsed.validators.len());
        for v in &payload.parsed.validators {
            let mut agg = match self.aggs.find_by_address(&v.address).await? {
                Some(agg) => agg,
                None => ValidatorAgg {
                    address: v.address.clone(),
                    started_at_height: height,
                    started_at: time,
                    recent_as_of_height: height,
                    recent_at: time,
                    recent_name: String::new(),
                    recent_metadata_url: String::new(),
                    recent_signer: String::new(),
                    recent_affiliation: String::new(),
                    recent_score: 0.0,
                    recent_signed: false,
                },
            };
            agg.recent_as_of_height = height;
            agg.recent_at = time;
            agg.recent_name = v.name.clone();
            agg.recent_metadata_url = v.metadata_url.clone();
            agg.recent_signer = v.signer.clone();
            agg.recent_affiliation = v.affiliation.clone();
            agg.recent_score = v.score;
            agg.recent_signed = v.signed;
            aggs.push(agg);
        }
        Ok(Patch::new(move |p: &mut Payload| p.aggregates.validators = aggs))
    }
}

// ─── Validator groups ─────────────────────────────────────────────────────────

pub struct ValidatorGroupAggCreator {
    aggs: Arc<dyn ValidatorGroupAggStore>,
}

impl ValidatorGroupAggCreator {
    pub fn new(aggs: Arc<dyn ValidatorGroupAggStore>) -> Self {
        Self { aggs }
    }
}

#[async_trait]
impl Task<Payload> for ValidatorGroupAggCreator {
    fn name(&self) -> &'static str {
        VALIDATOR_GROUP_AGG_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["aggregates.validator_groups"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let (height, time) = (payload.height, payload.time());
        let mut aggs = Vec::with_capacity(payload.parsed.validator_groups.len());
        for parsed in &payload.parsed.validator_groups {
            let g = &parsed.group;
            let mut agg = match self.aggs.find_by_address(&g.address).await? {
                Some(agg) => agg,
                None => ValidatorGroupAgg {
                    address: g.address.clone(),
                    started_at_height: height,
                    started_at: time,
                    recent_as_of_height: height,
                    recent_at: time,
                    recent_name: String::new(),
                    recent_metadata_url: String::new(),
                    recent_commission: 0.0,
                    recent_active_votes: 0,
                    recent_pending_votes: 0,
                    recent_voting_cap: 0,
                    recent_members_count: 0,
                },
            };
            agg.recent_as_of_height = height;
            agg.recent_at = time;
            agg.recent_name = g.name.clone();
            agg.recent_metadata_url = g.metadata_url.clone();
            agg.recent_commission = g.commission;
            agg.recent_active_votes = g.active_votes;
            agg.recent_pending_votes = g.pending_votes;
            agg.recent_voting_cap = g.voting_cap;
            agg.recent_members_count = parsed.members_count;
            aggs.push(agg);
        }
        Ok(Patch::new(move |p: &mut Payload| p.aggregates.validator_groups = aggs))
    }
}

// ─── Proposals ────────────────────────────────────────────────────────────────

/// Governance stage reached by a proposal operation, if the operation moves it.
pub fn proposal_stage(kind: &str) -> Option<&'static str> {
    match kind {
        "ProposalQueued" => Some("Queued"),
        "ProposalDequeued" => Some("Referendum"),
        "ProposalApproved" => Some("Approval"),
        "ProposalExecuted" => Some("Execution"),
        "ProposalExpired" => Some("Expiration"),
        _ => None,
    }
}

pub struct ProposalAggCreator {
    aggs: Arc<dyn ProposalAggStore>,
}

impl ProposalAggCreator {
    pub fn new(aggs: Arc<dyn ProposalAggStore>) -> Self {
        Self { aggs }
    }
}

#[async_trait]
impl Task<Payload> for ProposalAggCreator {
    fn name(&self) -> &'static str {
        PROPOSAL_AGG_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["aggregates.proposals"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let (height, time) = (payload.height, payload.time());

        let mut by_proposal: BTreeMap<u64, Vec<&GovernanceActivitySeq>> = BTreeMap::new();
        for activity in &payload.parsed.governance_activity {
            by_proposal.entry(activity.proposal_id).or_default().push(activity);
        }

        let mut aggs = Vec::with_capacity(by_proposal.len());
        for (proposal_id, activities) in by_proposal {
            let mut agg = match self.aggs.find_by_proposal_id(proposal_id).await? {
                Some(agg) => agg,
                None => new_proposal(proposal_id, height, time),
            };
            for activity in activities {
                apply_activity(&mut agg, activity);
            }
            agg.recent_as_of_height = height;
            agg.recent_at = time;
            aggs.push(agg);
        }
        Ok(Patch::new(move |p: &mut Payload| p.aggregates.proposals = aggs))
    }
}

fn new_proposal(proposal_id: u64, height: Height, time: DateTime<Utc>) -> ProposalAgg {
    ProposalAgg {
        proposal_id,
        proposer: String::new(),
        started_at_height: height,
        started_at: time,
        recent_as_of_height: height,
        recent_at: time,
        description_url: String::new(),
        deposit: 0,
        recent_stage: String::new(),
        upvotes: 0,
        yes_votes: 0,
        no_votes: 0,
        abstain_votes: 0,
    }
}

fn apply_activity(agg: &mut ProposalAgg, activity: &GovernanceActivitySeq) {
    let d = &activity.data;
    match activity.kind.as_str() {
        "ProposalQueued" => {
            agg.proposer = activity.account.clone();
            if let Some(url) = str_field(d, "descriptionUrl") {
                agg.description_url = url;
            }
            agg.deposit = amount_field(d, "deposit");
        }
        "ProposalUpvoted" => agg.upvotes += 1,
        "ProposalVoted" => match str_field(d, "value").as_deref() {
            Some("Yes") => agg.yes_votes += 1,
            Some("No") => agg.no_votes += 1,
            Some("Abstain") => agg.abstain_votes += 1,
            _ => {}
        },
        _ => {}
    }
    if let Some(stage) = proposal_stage(&activity.kind) {
        agg.recent_stage = stage.to_string();
    }
}
