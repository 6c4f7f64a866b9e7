//! System event analyzer.
//!
//! Compares the current height's sequences against stored history and emits
//! [`SystemEvent`]s. Three independent detectors run per height:
//!
//! - [`active_set`]: validators joining or leaving the set between `h-1` and `h`
//! - [`missed`]: validators hitting a missed-block threshold exactly
//! - [`rewards`]: epoch-over-epoch reward changes bucketed into tiers
//!
//! The detectors themselves are pure functions over records; [`Analyzer`]
//! loads the history they need from the store.

pub mod active_set;
pub mod missed;
pub mod rewards;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use chainpipe_core::config::AnalyzerConfig;
use chainpipe_core::error::IndexerError;
use chainpipe_core::model::{AccountActivitySeq, SystemEvent, ValidatorSeq};
use chainpipe_core::store::{AccountActivitySeqStore, Store, ValidatorSeqStore};
use chainpipe_core::types::Height;

/// What the analyzer knows about the height being processed.
#[derive(Debug, Clone, Copy)]
pub struct HeightView<'a> {
    pub height: Height,
    pub time: DateTime<Utc>,
    pub epoch_size: u64,
    pub last_in_epoch: bool,
    /// `None` when validators were not fetched at this height.
    pub validators: Option<&'a [ValidatorSeq]>,
    pub account_activity: &'a [AccountActivitySeq],
}

pub struct Analyzer {
    config: AnalyzerConfig,
    validator_seqs: Arc<dyn ValidatorSeqStore>,
    account_activity: Arc<dyn AccountActivitySeqStore>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig, store: &Store) -> Self {
        Self {
            config,
            validator_seqs: store.validator_seqs.clone(),
            account_activity: store.account_activity_seqs.clone(),
        }
    }

    /// Run every detector for one height.
    pub async fn analyze(&self, view: &HeightView<'_>) -> Result<Vec<SystemEvent>, IndexerError> {
        let mut events = Vec::new();

        if let Some(current) = view.validators {
            events.extend(self.active_set_events(view, current).await?);
            events.extend(self.missed_block_events(view, current).await?);
        }
        events.extend(self.reward_events(view).await?);

        tracing::debug!(height = view.height, events = events.len(), "height analyzed");
        Ok(events)
    }

    async fn active_set_events(
        &self,
        view: &HeightView<'_>,
        current: &[ValidatorSeq],
    ) -> Result<Vec<SystemEvent>, IndexerError> {
        // An empty previous set makes every current validator a joiner.
        let previous = match view.height.checked_sub(1) {
            Some(prev) => self.validator_seqs.find_by_height(prev).await?,
            None => Vec::new(),
        };
        Ok(active_set::detect(view.height, view.time, current, &previous))
    }

    async fn missed_block_events(
        &self,
        view: &HeightView<'_>,
        current: &[ValidatorSeq],
    ) -> Result<Vec<SystemEvent>, IndexerError> {
        let thresholds = missed::Thresholds::from(&self.config);
        let mut events = Vec::new();
        for seq in current.iter().filter(|s| !s.signed) {
            let history = match self
                .validator_seqs
                .find_last_by_address(&seq.address, view.height, self.config.max_validator_sequences)
                .await
            {
                Ok(history) => history,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
            events.extend(missed::detect(seq, &history, &thresholds));
        }
        Ok(events)
    }

    async fn reward_events(&self, view: &HeightView<'_>) -> Result<Vec<SystemEvent>, IndexerError> {
        if !view.last_in_epoch || view.epoch_size == 0 || view.height <= view.epoch_size {
            return Ok(Vec::new());
        }
        let kind = self.config.reward_activity_kind.as_str();
        let current: Vec<&AccountActivitySeq> =
            view.account_activity.iter().filter(|a| a.kind == kind).collect();
        let previous = self
            .account_activity
            .find_by_height_and_kind(view.height - view.epoch_size, kind)
            .await?;
        Ok(rewards::detect(
            view.height,
            view.time,
            current.into_iter(),
            previous.iter(),
        ))
    }
}
