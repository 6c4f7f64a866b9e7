//! Missed-block detection for one validator.
//!
//! The window is the current (unsigned) record followed by up to
//! `max_validator_sequences` prior records, most recent first. Both checks
//! fire only when the count lands exactly on its threshold.

use serde_json::json;

use chainpipe_core::config::AnalyzerConfig;
use chainpipe_core::model::{SystemEvent, SystemEventKind, ValidatorSeq};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub missed_for_max: usize,
    pub missed_in_row: usize,
}

impl From<&AnalyzerConfig> for Thresholds {
    fn from(config: &AnalyzerConfig) -> Self {
        Self {
            missed_for_max: config.missed_for_max_threshold,
            missed_in_row: config.missed_in_row_threshold,
        }
    }
}

/// `history` must be the address's prior records, most recent first.
pub fn detect(current: &ValidatorSeq, history: &[ValidatorSeq], thresholds: &Thresholds) -> Vec<SystemEvent> {
    if current.signed {
        return Vec::new();
    }

    let window: Vec<&ValidatorSeq> = std::iter::once(current).chain(history.iter()).collect();
    let mut events = Vec::new();

    let total_missed = window.iter().filter(|s| !s.signed).count();
    if total_missed == thresholds.missed_for_max {
        events.push(event(
            current,
            SystemEventKind::MissedNofM,
            json!({ "threshold": thresholds.missed_for_max, "window_size": window.len() }),
        ));
    }

    let missed_in_row = window
        .iter()
        .take(thresholds.missed_in_row)
        .take_while(|s| !s.signed)
        .count();
    if missed_in_row == thresholds.missed_in_row {
        events.push(event(
            current,
            SystemEventKind::MissedNConsecutive,
            json!({ "threshold": thresholds.missed_in_row }),
        ));
    }

    events
}

fn event(current: &ValidatorSeq, kind: SystemEventKind, data: serde_json::Value) -> SystemEvent {
    SystemEvent {
        height: current.height,
        time: current.time,
        actor: current.address.clone(),
        kind,
        data,
    }
}
