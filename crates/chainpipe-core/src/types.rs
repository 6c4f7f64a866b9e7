//! Raw chain data as returned by a [`ChainClient`](crate::client::ChainClient).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A block height, the indexing unit.
pub type Height = u64;

// ─── Chain-level info ─────────────────────────────────────────────────────────

/// Current state of the chain as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain_id: u64,
    /// Last confirmed height.
    pub latest_height: Height,
    pub latest_time: DateTime<Utc>,
}

/// Static chain parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    /// Number of heights per epoch.
    pub epoch_size: u64,
}

/// Per-height metadata fetched before anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightMeta {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub epoch: u64,
    pub epoch_size: u64,
    /// `true` for the last height of an epoch (rewards are distributed here).
    pub last_in_epoch: bool,
}

// ─── Block / validators ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    pub height: Height,
    pub hash: String,
    pub parent_hash: String,
    pub time: DateTime<Utc>,
    pub size: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub tx_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawValidator {
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata_url: String,
    #[serde(default)]
    pub signer: String,
    /// Address of the validator group this validator belongs to.
    #[serde(default)]
    pub affiliation: String,
    #[serde(default)]
    pub score: f64,
    /// Whether the validator signed (validated) this height.
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawValidatorGroup {
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata_url: String,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub active_votes: u128,
    #[serde(default)]
    pub pending_votes: u128,
    #[serde(default)]
    pub voting_cap: u128,
    #[serde(default)]
    pub members: Vec<String>,
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// A decoded contract operation (event) emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOperation {
    /// Operation name, e.g. `"EpochRewardsDistributedToVoters"`.
    pub name: String,
    /// Decoded fields.
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    pub height: Height,
    pub time: DateTime<Utc>,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub operations: Vec<RawOperation>,
}

/// On-chain identity of an account (name + metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub metadata_url: String,
}

/// Everything a fetch worker retrieves for one height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHeightData {
    pub height: Height,
    pub meta: HeightMeta,
    pub block: Option<RawBlock>,
    pub validators: Vec<RawValidator>,
    pub validator_groups: Vec<RawValidatorGroup>,
    pub transactions: Vec<RawTransaction>,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_defaults_on_missing_fields() {
        let v: RawValidator =
            serde_json::from_str(r#"{"address":"0xabc","signed":false}"#).unwrap();
        assert_eq!(v.address, "0xabc");
        assert!(v.name.is_empty());
        assert!(!v.signed);
    }

    #[test]
    fn large_vote_counts_roundtrip() {
        let g = RawValidatorGroup {
            address: "0xg".into(),
            name: "group".into(),
            metadata_url: String::new(),
            commission: 0.1,
            active_votes: 12_000_000_000_000_000_000_000,
            pending_votes: 0,
            voting_cap: 0,
            members: vec!["0xv1".into()],
        };
        let json = serde_json::to_string(&g).unwrap();
        let back: RawValidatorGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(back.active_votes, g.active_votes);
    }
}
