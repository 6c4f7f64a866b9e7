//! The terminal consumer of fully processed payloads.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use chainpipe_core::client::ChainClient;
use chainpipe_core::error::IndexerError;
use chainpipe_core::pipeline::{RunContext, Sink};
use chainpipe_core::store::SyncableStore;

use crate::metrics::IndexerMetrics;
use crate::payload::Payload;

/// Marks each height's syncable processed and records run metrics.
pub struct IndexSink {
    syncables: Arc<dyn SyncableStore>,
    client: Arc<dyn ChainClient>,
    metrics: IndexerMetrics,
    success_count: u64,
}

impl IndexSink {
    pub fn new(syncables: Arc<dyn SyncableStore>, client: Arc<dyn ChainClient>, metrics: IndexerMetrics) -> Self {
        Self {
            syncables,
            client,
            metrics,
            success_count: 0,
        }
    }
}

#[async_trait]
impl Sink<Payload> for IndexSink {
    async fn consume(&mut self, ctx: &RunContext, payload: Payload) -> Result<(), IndexerError> {
        let height = ctx.height();
        let mut syncable = payload
            .syncable
            .ok_or_else(|| IndexerError::validation("syncable", format!("missing at height {height}")))?;

        syncable.mark_processed(payload.index_version, Utc::now());
        self.syncables.create_or_update(&syncable).await?;

        let requests = self
            .client
            .request_count()
            .saturating_sub(payload.setup.request_count_start);
        let duration_ms = syncable.duration_ms.max(0) as u64;
        self.metrics.record_height(height, duration_ms, requests);
        self.success_count += 1;

        tracing::info!(
            height,
            version = payload.index_version,
            duration_ms,
            requests,
            events = payload.system_events.len(),
            "height indexed"
        );
        Ok(())
    }

    fn success_count(&self) -> u64 {
        self.success_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::{time, ScriptedClient};
    use chainpipe_core::model::Syncable;
    use chainpipe_storage::InMemoryStorage;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn consume_marks_processed_and_counts() {
        let store = Arc::new(InMemoryStorage::new());
        let metrics = IndexerMetrics::new();
        let mut sink = IndexSink::new(store.clone(), Arc::new(ScriptedClient::default()), metrics.clone());

        let mut payload = Payload::new(3, 2, Some(1));
        payload.syncable = Some(Syncable {
            height: 3,
            time: time(3),
            epoch: 0,
            last_in_epoch: false,
            index_version: 1,
            report_id: Some(1),
            started_at: payload.started_at,
            processed_at: None,
            duration_ms: 0,
        });
        let ctx = RunContext::new(3, CancellationToken::new());
        sink.consume(&ctx, payload).await.unwrap();

        let stored = store.find_by_height(3).await.unwrap().unwrap();
        assert!(stored.is_processed());
        assert_eq!(stored.index_version, 2);
        assert_eq!(sink.success_count(), 1);
        assert_eq!(metrics.snapshot().last_height, 3);
    }

    #[tokio::test]
    async fn payload_without_syncable_is_rejected() {
        let mut sink = IndexSink::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(ScriptedClient::default()),
            IndexerMetrics::new(),
        );
        let ctx = RunContext::new(3, CancellationToken::new());
        assert!(sink.consume(&ctx, Payload::new(3, 1, None)).await.is_err());
        assert_eq!(sink.success_count(), 0);
    }
}
