//! Analyze stage.

use async_trait::async_trait;

use chainpipe_core::config::AnalyzerConfig;
use chainpipe_core::error::IndexerError;
use chainpipe_core::pipeline::{Patch, RunContext, Task};
use chainpipe_core::store::Store;

use super::SYSTEM_EVENT_CREATOR;
use crate::analyzer::{Analyzer, HeightView};
use crate::payload::Payload;

pub struct SystemEventCreator {
    analyzer: Analyzer,
}

impl SystemEventCreator {
    pub fn new(store: Store, config: AnalyzerConfig) -> Self {
        Self {
            analyzer: Analyzer::new(config, &store),
        }
    }
}

#[async_trait]
impl Task<Payload> for SystemEventCreator {
    fn name(&self) -> &'static str {
        SYSTEM_EVENT_CREATOR
    }

    fn writes(&self) -> &'static [&'static str] {
        &["system_events"]
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let meta = payload.meta()?;
        let view = HeightView {
            height: payload.height,
            time: meta.time,
            epoch_size: meta.epoch_size,
            last_in_epoch: meta.last_in_epoch,
            validators: payload.sequences.validators.as_deref(),
            account_activity: payload.sequences.account_activity.as_deref().unwrap_or_default(),
        };
        let events = self.analyzer.analyze(&view).await?;
        if !events.is_empty() {
            tracing::info!(height = payload.height, events = events.len(), "system events detected");
        }
        Ok(Patch::new(move |p: &mut Payload| p.system_events = events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::fixtures::seq;
    use crate::tasks::testutil::time;
    use chainpipe_core::model::SystemEventKind;
    use chainpipe_core::store::ValidatorSeqStore;
    use chainpipe_core::types::HeightMeta;
    use chainpipe_storage::InMemoryStorage;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn events_land_on_payload() {
        let backend = Arc::new(InMemoryStorage::new());
        ValidatorSeqStore::bulk_upsert(backend.as_ref(), &[seq(11, "OLD", true)])
            .await
            .unwrap();
        let task = SystemEventCreator::new(Store::from_backend(backend), AnalyzerConfig::default());

        let mut payload = Payload::new(12, 1, None);
        payload.setup.meta = Some(HeightMeta {
            height: 12,
            time: time(12),
            epoch: 1,
            epoch_size: 10,
            last_in_epoch: false,
        });
        payload.sequences.validators = Some(vec![seq(12, "NEW", true)]);

        let ctx = RunContext::new(12, CancellationToken::new());
        task.run(&ctx, &payload).await.unwrap().apply(&mut payload);

        let kinds: Vec<_> = payload.system_events.iter().map(|e| (e.actor.as_str(), e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("NEW", SystemEventKind::JoinedActiveSet),
                ("OLD", SystemEventKind::LeftActiveSet),
            ]
        );
    }
}
