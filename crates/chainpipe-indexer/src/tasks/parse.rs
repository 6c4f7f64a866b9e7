//! Parse stage: normalise raw validators and groups, and decode account and
//! governance activity from transaction operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use chainpipe_core::client::ChainClient;
use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{AccountActivitySeq, GovernanceActivitySeq};
use chainpipe_core::pipeline::{Patch, RunContext, Task};
use chainpipe_core::types::{RawOperation, RawTransaction, RawValidator, RawValidatorGroup};

use super::{tolerate_partial, PARSER};
use crate::payload::{ParsedData, ParsedValidatorGroup, Payload};

pub const VALIDATOR_PAYMENT: &str = "ValidatorEpochPaymentDistributed";
pub const VOTER_REWARDS: &str = "EpochRewardsDistributedToVoters";
pub const TRANSFER: &str = "Transfer";
const GOVERNANCE_PREFIX: &str = "Proposal";

pub struct Parser {
    client: Arc<dyn ChainClient>,
}

impl Parser {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Fill in missing names from the on-chain identity registry.
    async fn with_identities(
        &self,
        height: u64,
        mut validators: Vec<RawValidator>,
    ) -> Result<Vec<RawValidator>, IndexerError> {
        for v in validators.iter_mut().filter(|v| v.name.is_empty()) {
            let identity =
                tolerate_partial(PARSER, height, self.client.identity(&v.address, height).await)?;
            if let Some(identity) = identity.flatten() {
                v.name = identity.name;
                if v.metadata_url.is_empty() {
                    v.metadata_url = identity.metadata_url;
                }
            }
        }
        Ok(validators)
    }
}

#[async_trait]
impl Task<Payload> for Parser {
    fn name(&self) -> &'static str {
        PARSER
    }

    async fn run(&self, ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let height = ctx.height();
        let time = payload.meta()?.time;

        let validators = self
            .with_identities(height, payload.raw.validators.clone().unwrap_or_default())
            .await?;
        let validator_groups = parse_groups(
            payload.raw.validator_groups.as_deref().unwrap_or_default(),
            &validators,
        );

        let mut account_activity = Vec::new();
        let mut governance_activity = Vec::new();
        for tx in payload.raw.transactions.as_deref().unwrap_or_default() {
            for op in &tx.operations {
                if op.name.starts_with(GOVERNANCE_PREFIX) {
                    governance_activity.push(governance_activity_from(tx, op, time));
                } else {
                    account_activity.extend(account_activity_from(tx, op, time));
                }
            }
        }

        tracing::debug!(
            height,
            validators = validators.len(),
            groups = validator_groups.len(),
            account_activity = account_activity.len(),
            governance_activity = governance_activity.len(),
            "height parsed"
        );

        let parsed = ParsedData {
            validators,
            validator_groups,
            account_activity,
            governance_activity,
        };
        Ok(Patch::new(move |p: &mut Payload| p.parsed = parsed))
    }
}

/// Attach member statistics to each group.
pub fn parse_groups(groups: &[RawValidatorGroup], validators: &[RawValidator]) -> Vec<ParsedValidatorGroup> {
    let signed: HashMap<&str, bool> = validators
        .iter()
        .map(|v| (v.address.as_str(), v.signed))
        .collect();

    groups
        .iter()
        .map(|g| {
            let known: Vec<bool> = g
                .members
                .iter()
                .filter_map(|m| signed.get(m.as_str()).copied())
                .collect();
            let members_avg_signed = if known.is_empty() {
                0.0
            } else {
                known.iter().filter(|s| **s).count() as f64 / known.len() as f64
            };
            ParsedValidatorGroup {
                group: g.clone(),
                members_count: g.members.len() as u32,
                members_avg_signed,
            }
        })
        .collect()
}

/// Account activity produced by one operation, keyed on the account it concerns.
pub fn account_activity_from(
    tx: &RawTransaction,
    op: &RawOperation,
    time: DateTime<Utc>,
) -> Vec<AccountActivitySeq> {
    let d = &op.details;
    let entry = |address: String, amount: u128| AccountActivitySeq {
        height: tx.height,
        time,
        address,
        tx_hash: tx.hash.clone(),
        kind: op.name.clone(),
        amount,
        data: d.clone(),
    };

    match op.name.as_str() {
        VALIDATOR_PAYMENT => vec![entry(
            str_field(d, "validator").unwrap_or_else(|| tx.from.clone()),
            amount_field(d, "validatorPayment"),
        )],
        VOTER_REWARDS => vec![entry(
            str_field(d, "group").unwrap_or_else(|| tx.from.clone()),
            amount_field(d, "value"),
        )],
        TRANSFER => {
            let amount = amount_field(d, "value");
            let from = str_field(d, "from").unwrap_or_else(|| tx.from.clone());
            let mut out = vec![entry(from.clone(), amount)];
            if let Some(to) = str_field(d, "to").filter(|to| *to != from) {
                out.push(entry(to, amount));
            }
            out
        }
        _ => vec![entry(tx.from.clone(), amount_field(d, "value"))],
    }
}

pub fn governance_activity_from(
    tx: &RawTransaction,
    op: &RawOperation,
    time: DateTime<Utc>,
) -> GovernanceActivitySeq {
    let d = &op.details;
    GovernanceActivitySeq {
        height: tx.height,
        time,
        proposal_id: u64_field(d, "proposalId"),
        account: str_field(d, "account")
            .or_else(|| str_field(d, "proposer"))
            .unwrap_or_else(|| tx.from.clone()),
        tx_hash: tx.hash.clone(),
        kind: op.name.clone(),
        data: d.clone(),
    }
}

pub(crate) fn str_field(details: &Value, key: &str) -> Option<String> {
    details
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Amounts arrive as decimal strings (too large for JSON numbers) or numbers.
pub(crate) fn amount_field(details: &Value, key: &str) -> u128 {
    match details.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        Some(Value::Number(n)) => n.as_u64().map(u128::from).unwrap_or_default(),
        _ => 0,
    }
}

pub(crate) fn u64_field(details: &Value, key: &str) -> u64 {
    match details.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
        _ => 0,
    }
}
