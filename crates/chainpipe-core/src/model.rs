//! Persisted records: bookkeeping (syncables, reports, jobs), per-height
//! sequences, aggregates and system events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::Height;

// ─── Syncable ─────────────────────────────────────────────────────────────────

/// Per-height bookkeeping: whether, when and under which index version a
/// height was processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Syncable {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub epoch: u64,
    pub last_in_epoch: bool,
    pub index_version: u64,
    pub report_id: Option<u64>,
    pub started_at: DateTime<Utc>,
    /// `None` until the sink commits the height.
    pub processed_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
}

impl Syncable {
    /// Stamp the height as committed under `index_version`.
    pub fn mark_processed(&mut self, index_version: u64, now: DateTime<Utc>) {
        self.index_version = index_version;
        self.duration_ms = (now - self.started_at).num_milliseconds();
        self.processed_at = Some(now);
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

// ─── Report ───────────────────────────────────────────────────────────────────

/// Kind of indexing run a [`Report`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Index,
    SequentialReindex,
    ParallelReindex,
}

impl ReportKind {
    pub const REINDEX: [ReportKind; 2] = [Self::SequentialReindex, Self::ParallelReindex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::SequentialReindex => "sequential_reindex",
            Self::ParallelReindex => "parallel_reindex",
        }
    }
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(Self::Index),
            "sequential_reindex" => Ok(Self::SequentialReindex),
            "parallel_reindex" => Ok(Self::ParallelReindex),
            other => Err(IndexerError::Other(format!("unknown report kind: {other}"))),
        }
    }
}

/// Metadata describing one indexing or backfill run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Assigned by the store on create.
    pub id: u64,
    pub kind: ReportKind,
    pub index_version: u64,
    pub start_height: Height,
    pub end_height: Height,
    pub success_count: Option<u64>,
    pub error_count: Option<u64>,
    pub error_msg: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn new(kind: ReportKind, index_version: u64, start_height: Height, end_height: Height) -> Self {
        Self {
            id: 0,
            kind,
            index_version,
            start_height,
            end_height,
            success_count: None,
            error_count: None,
            error_msg: None,
            duration_ms: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

// ─── Job ──────────────────────────────────────────────────────────────────────

/// One height's unit of fetch work for the distributed fetch path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub height: Height,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(height: Height, now: DateTime<Utc>) -> Self {
        Self {
            height,
            created_at: now,
            started_at: None,
            finished_at: None,
            run_count: 0,
            last_error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

// ─── Sequences ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSeq {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub hash: String,
    pub tx_count: u32,
    pub size: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
}

impl BlockSeq {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.hash.is_empty() {
            return Err(IndexerError::validation("block sequence", "hash is required"));
        }
        if self.gas_used > self.gas_limit {
            return Err(IndexerError::validation(
                "block sequence",
                format!("gas used {} exceeds limit {}", self.gas_used, self.gas_limit),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSeq {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub address: String,
    pub name: String,
    pub affiliation: String,
    pub score: f64,
    /// Whether the validator signed (validated) this height.
    pub signed: bool,
}

impl ValidatorSeq {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.address.is_empty() {
            return Err(IndexerError::validation("validator sequence", "address is required"));
        }
        if !(0.0..=1.0).contains(&self.score) {
            return Err(IndexerError::validation(
                "validator sequence",
                format!("score {} out of range", self.score),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorGroupSeq {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub address: String,
    pub name: String,
    pub commission: f64,
    pub active_votes: u128,
    pub pending_votes: u128,
    pub voting_cap: u128,
    pub members_count: u32,
    /// Share of members that signed this height.
    pub members_avg_signed: f64,
}

impl ValidatorGroupSeq {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.address.is_empty() {
            return Err(IndexerError::validation("validator group sequence", "address is required"));
        }
        Ok(())
    }
}

/// One account-level operation at a height (transfers, reward payments, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountActivitySeq {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub address: String,
    pub tx_hash: String,
    pub kind: String,
    pub amount: u128,
    pub data: serde_json::Value,
}

impl AccountActivitySeq {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.address.is_empty() {
            return Err(IndexerError::validation("account activity", "address is required"));
        }
        if self.kind.is_empty() {
            return Err(IndexerError::validation("account activity", "kind is required"));
        }
        Ok(())
    }

    /// Natural key used for upserts.
    pub fn key(&self) -> (Height, &str, &str, &str) {
        (self.height, &self.tx_hash, &self.address, &self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceActivitySeq {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub proposal_id: u64,
    pub account: String,
    pub tx_hash: String,
    pub kind: String,
    pub data: serde_json::Value,
}

impl GovernanceActivitySeq {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.kind.is_empty() {
            return Err(IndexerError::validation("governance activity", "kind is required"));
        }
        Ok(())
    }
}

// ─── Aggregates ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorAgg {
    pub address: String,
    pub started_at_height: Height,
    pub started_at: DateTime<Utc>,
    pub recent_as_of_height: Height,
    pub recent_at: DateTime<Utc>,
    pub recent_name: String,
    pub recent_metadata_url: String,
    pub recent_signer: String,
    pub recent_affiliation: String,
    pub recent_score: f64,
    pub recent_signed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorGroupAgg {
    pub address: String,
    pub started_at_height: Height,
    pub started_at: DateTime<Utc>,
    pub recent_as_of_height: Height,
    pub recent_at: DateTime<Utc>,
    pub recent_name: String,
    pub recent_metadata_url: String,
    pub recent_commission: f64,
    pub recent_active_votes: u128,
    pub recent_pending_votes: u128,
    pub recent_voting_cap: u128,
    pub recent_members_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalAgg {
    pub proposal_id: u64,
    pub proposer: String,
    pub started_at_height: Height,
    pub started_at: DateTime<Utc>,
    pub recent_as_of_height: Height,
    pub recent_at: DateTime<Utc>,
    pub description_url: String,
    pub deposit: u128,
    /// Last governance stage reached, e.g. `"Queued"`, `"Referendum"` or `"Execution"`.
    pub recent_stage: String,
    pub upvotes: u64,
    pub yes_votes: u64,
    pub no_votes: u64,
    pub abstain_votes: u64,
}

// ─── System events ────────────────────────────────────────────────────────────

/// Kind of behavioral signal emitted by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    JoinedActiveSet,
    LeftActiveSet,
    MissedNofM,
    MissedNConsecutive,
    RewardChange1,
    RewardChange2,
    RewardChange3,
}

impl SystemEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinedActiveSet => "joined_active_set",
            Self::LeftActiveSet => "left_active_set",
            Self::MissedNofM => "missed_n_of_m",
            Self::MissedNConsecutive => "missed_n_consecutive",
            Self::RewardChange1 => "reward_change_1",
            Self::RewardChange2 => "reward_change_2",
            Self::RewardChange3 => "reward_change_3",
        }
    }
}

impl std::fmt::Display for SystemEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SystemEventKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "joined_active_set" => Self::JoinedActiveSet,
            "left_active_set" => Self::LeftActiveSet,
            "missed_n_of_m" => Self::MissedNofM,
            "missed_n_consecutive" => Self::MissedNConsecutive,
            "reward_change_1" => Self::RewardChange1,
            "reward_change_2" => Self::RewardChange2,
            "reward_change_3" => Self::RewardChange3,
            other => return Err(IndexerError::Other(format!("unknown system event kind: {other}"))),
        })
    }
}

/// A derived behavioral signal. Upserted by `(height, actor, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub actor: String,
    pub kind: SystemEventKind,
    pub data: serde_json::Value,
}

impl SystemEvent {
    pub fn key(&self) -> (Height, &str, SystemEventKind) {
        (self.height, &self.actor, self.kind)
    }
}
