//! Active-set churn between two consecutive heights.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::json;

use chainpipe_core::model::{SystemEvent, SystemEventKind, ValidatorSeq};
use chainpipe_core::types::Height;

/// `JoinedActiveSet` for every address in `current \ previous`, `LeftActiveSet`
/// for every address in `previous \ current`.
pub fn detect(
    height: Height,
    time: DateTime<Utc>,
    current: &[ValidatorSeq],
    previous: &[ValidatorSeq],
) -> Vec<SystemEvent> {
    let c: BTreeSet<&str> = current.iter().map(|s| s.address.as_str()).collect();
    let p: BTreeSet<&str> = previous.iter().map(|s| s.address.as_str()).collect();

    let event = |actor: &str, kind: SystemEventKind| SystemEvent {
        height,
        time,
        actor: actor.to_string(),
        kind,
        data: json!({ "previous_height": height.saturating_sub(1) }),
    };

    let joined = c.difference(&p).map(|a| event(a, SystemEventKind::JoinedActiveSet));
    let left = p.difference(&c).map(|a| event(a, SystemEventKind::LeftActiveSet));
    joined.chain(left).collect()
}
