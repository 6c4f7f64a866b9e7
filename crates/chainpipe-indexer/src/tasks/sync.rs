//! Sync stage: build the height's bookkeeping record.

use async_trait::async_trait;

use chainpipe_core::error::IndexerError;
use chainpipe_core::model::Syncable;
use chainpipe_core::pipeline::{Patch, RunContext, Task};

use super::MAIN_SYNCER;
use crate::payload::Payload;

/// Creates the unprocessed [`Syncable`]; the sink marks it processed once the
/// whole height committed.
pub struct MainSyncer;

#[async_trait]
impl Task<Payload> for MainSyncer {
    fn name(&self) -> &'static str {
        MAIN_SYNCER
    }

    async fn run(&self, _ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let meta = payload.meta()?;
        let syncable = Syncable {
            height: payload.height,
            time: meta.time,
            epoch: meta.epoch,
            last_in_epoch: meta.last_in_epoch,
            index_version: payload.index_version,
            report_id: payload.report_id,
            started_at: payload.started_at,
            processed_at: None,
            duration_ms: 0,
        };
        Ok(Patch::new(move |p: &mut Payload| p.syncable = Some(syncable)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::time;
    use chainpipe_core::types::HeightMeta;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn syncable_carries_version_and_report() {
        let mut payload = Payload::new(30, 4, Some(9));
        payload.setup.meta = Some(HeightMeta {
            height: 30,
            time: time(30),
            epoch: 3,
            epoch_size: 10,
            last_in_epoch: true,
        });
        let ctx = RunContext::new(30, CancellationToken::new());
        MainSyncer.run(&ctx, &payload).await.unwrap().apply(&mut payload);

        let s = payload.syncable.unwrap();
        assert_eq!(s.index_version, 4);
        assert_eq!(s.report_id, Some(9));
        assert!(s.last_in_epoch);
        assert!(!s.is_processed());
    }

    #[tokio::test]
    async fn missing_metadata_fails() {
        let payload = Payload::new(30, 4, None);
        let ctx = RunContext::new(30, CancellationToken::new());
        assert!(matches!(
            MainSyncer.run(&ctx, &payload).await,
            Err(IndexerError::Validation { .. })
        ));
    }
}
