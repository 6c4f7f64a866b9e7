//! The per-height execution context threaded through every stage.
//!
//! Fields are grouped by the stage that owns them. A stage only writes its own
//! group; later stages read earlier groups.

use chrono::{DateTime, Utc};
use serde::Serialize;

use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{
    AccountActivitySeq, BlockSeq, GovernanceActivitySeq, ProposalAgg, Syncable, SystemEvent,
    ValidatorAgg, ValidatorGroupAgg, ValidatorGroupSeq, ValidatorSeq,
};
use chainpipe_core::types::{
    Height, HeightMeta, RawBlock, RawHeightData, RawTransaction, RawValidator, RawValidatorGroup,
};

/// Written by the Setup stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SetupData {
    pub meta: Option<HeightMeta>,
    /// Client request counter when the height started.
    pub request_count_start: u64,
    /// Raw data prefetched by a fetch worker, if any.
    #[serde(skip)]
    pub cached: Option<RawHeightData>,
}

/// Written by the Fetch stage; `None` means "not fetched" (skipped or not deployed yet).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawData {
    pub block: Option<RawBlock>,
    pub validators: Option<Vec<RawValidator>>,
    pub validator_groups: Option<Vec<RawValidatorGroup>>,
    pub transactions: Option<Vec<RawTransaction>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedValidatorGroup {
    pub group: RawValidatorGroup,
    pub members_count: u32,
    /// Share of this group's members that signed the height.
    pub members_avg_signed: f64,
}

/// Written by the Parse stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedData {
    pub validators: Vec<RawValidator>,
    pub validator_groups: Vec<ParsedValidatorGroup>,
    pub account_activity: Vec<AccountActivitySeq>,
    pub governance_activity: Vec<GovernanceActivitySeq>,
}

/// Written by the Sequence stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Sequences {
    pub block: Option<BlockSeq>,
    pub validators: Option<Vec<ValidatorSeq>>,
    pub validator_groups: Option<Vec<ValidatorGroupSeq>>,
    pub account_activity: Option<Vec<AccountActivitySeq>>,
    pub governance_activity: Option<Vec<GovernanceActivitySeq>>,
}

/// Written by the Aggregate stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Aggregates {
    pub validators: Vec<ValidatorAgg>,
    pub validator_groups: Vec<ValidatorGroupAgg>,
    pub proposals: Vec<ProposalAgg>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    pub height: Height,
    /// Index version this run writes.
    pub index_version: u64,
    pub report_id: Option<u64>,
    pub started_at: DateTime<Utc>,

    pub setup: SetupData,
    pub raw: RawData,
    pub parsed: ParsedData,
    pub syncable: Option<Syncable>,
    pub sequences: Sequences,
    pub aggregates: Aggregates,
    pub system_events: Vec<SystemEvent>,
}

impl Payload {
    pub fn new(height: Height, index_version: u64, report_id: Option<u64>) -> Self {
        Self {
            height,
            index_version,
            report_id,
            started_at: Utc::now(),
            setup: SetupData::default(),
            raw: RawData::default(),
            parsed: ParsedData::default(),
            syncable: None,
            sequences: Sequences::default(),
            aggregates: Aggregates::default(),
            system_events: Vec::new(),
        }
    }

    /// Height metadata; every stage after Setup relies on it.
    pub fn meta(&self) -> Result<&HeightMeta, IndexerError> {
        self.setup
            .meta
            .as_ref()
            .ok_or_else(|| IndexerError::validation("payload", "height metadata missing"))
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.setup.meta.as_ref().map_or(self.started_at, |m| m.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_payload_is_empty() {
        let p = Payload::new(12, 3, Some(1));
        assert_eq!(p.height, 12);
        assert!(p.meta().is_err());
        assert!(p.raw.block.is_none());
        assert!(p.system_events.is_empty());
    }

    #[test]
    fn payload_dumps_as_json() {
        let p = Payload::new(1, 1, None);
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["height"], 1);
        assert!(v["setup"].get("cached").is_none());
    }
}
