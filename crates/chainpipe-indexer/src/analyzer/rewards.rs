//! Reward-change bucketing between the current and a reference epoch.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::json;

use chainpipe_core::model::{AccountActivitySeq, SystemEvent, SystemEventKind};
use chainpipe_core::types::Height;

/// `(1 - current/previous) * 100` rounded to one decimal; `current` itself when
/// there is no previous amount.
pub fn change_rate(current: u128, previous: u128) -> f64 {
    let rate = if previous == 0 {
        current as f64
    } else {
        (1.0 - current as f64 / previous as f64) * 100.0
    };
    (rate * 10.0).round() / 10.0
}

/// Tier for an already rounded change rate.
pub fn tier(rate: f64) -> Option<SystemEventKind> {
    let abs = rate.abs();
    if abs >= 10.0 {
        Some(SystemEventKind::RewardChange3)
    } else if abs >= 1.0 {
        Some(SystemEventKind::RewardChange2)
    } else if abs >= 0.1 {
        Some(SystemEventKind::RewardChange1)
    } else {
        None
    }
}

fn totals<'a>(records: impl IntoIterator<Item = &'a AccountActivitySeq>) -> BTreeMap<String, u128> {
    let mut out = BTreeMap::new();
    for r in records {
        let sum: &mut u128 = out.entry(r.address.clone()).or_default();
        *sum = sum.saturating_add(r.amount);
    }
    out
}

/// One event per address whose summed reward moved by at least 0.1%.
/// An address missing from one window counts as zero there.
pub fn detect<'a, 'b>(
    height: Height,
    time: DateTime<Utc>,
    current: impl IntoIterator<Item = &'a AccountActivitySeq>,
    previous: impl IntoIterator<Item = &'b AccountActivitySeq>,
) -> Vec<SystemEvent> {
    let current = totals(current);
    let previous = totals(previous);
    let addresses: BTreeSet<&String> = current.keys().chain(previous.keys()).collect();

    addresses
        .into_iter()
        .filter_map(|address| {
            let after = current.get(address).copied().unwrap_or_default();
            let before = previous.get(address).copied().unwrap_or_default();
            let rate = change_rate(after, before);
            tier(rate).map(|kind| SystemEvent {
                height,
                time,
                actor: address.clone(),
                kind,
                // u128 amounts do not fit JSON numbers.
                data: json!({
                    "before": before.to_string(),
                    "after": after.to_string(),
                    "change_rate": rate,
                }),
            })
        })
        .collect()
}
