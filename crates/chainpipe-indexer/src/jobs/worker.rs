//! Fetch workers: pull one height's raw chain data into the raw-height cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use chainpipe_core::client::ChainClient;
use chainpipe_core::error::IndexerError;
use chainpipe_core::store::RawHeightStore;
use chainpipe_core::types::{Height, RawHeightData};

use crate::tasks::tolerate_partial;

/// Fetches and caches the raw data of one height.
#[async_trait]
pub trait FetchWorker: Send + Sync {
    async fn fetch(&self, height: Height) -> Result<(), IndexerError>;
}

/// Fetches through a [`ChainClient`] and saves into a [`RawHeightStore`].
pub struct ClientFetchWorker {
    client: Arc<dyn ChainClient>,
    raw: Arc<dyn RawHeightStore>,
}

impl ClientFetchWorker {
    pub fn new(client: Arc<dyn ChainClient>, raw: Arc<dyn RawHeightStore>) -> Self {
        Self { client, raw }
    }
}

#[async_trait]
impl FetchWorker for ClientFetchWorker {
    async fn fetch(&self, height: Height) -> Result<(), IndexerError> {
        let meta = self.client.height_meta(height).await?;
        let (block, validators, groups, txs) = tokio::join!(
            self.client.block(height),
            self.client.validators(height),
            self.client.validator_groups(height),
            self.client.transactions(height),
        );

        let data = RawHeightData {
            height,
            meta,
            block: tolerate_partial("FetchWorker", height, block)?,
            validators: tolerate_partial("FetchWorker", height, validators)?.unwrap_or_default(),
            validator_groups: tolerate_partial("FetchWorker", height, groups)?.unwrap_or_default(),
            transactions: tolerate_partial("FetchWorker", height, txs)?.unwrap_or_default(),
            fetched_at: Utc::now(),
        };
        self.raw.save(&data).await?;
        tracing::debug!(height, validators = data.validators.len(), "raw height cached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::ScriptedClient;
    use chainpipe_storage::InMemoryStorage;

    #[tokio::test]
    async fn caches_raw_height_data() {
        let store = Arc::new(InMemoryStorage::new());
        let worker = ClientFetchWorker::new(Arc::new(ScriptedClient::default()), store.clone());
        worker.fetch(7).await.unwrap();

        let raw = RawHeightStore::find_by_height(store.as_ref(), 7).await.unwrap().unwrap();
        assert_eq!(raw.meta.height, 7);
        assert_eq!(raw.block.map(|b| b.height), Some(7));
    }

    #[tokio::test]
    async fn undeployed_contracts_leave_fields_empty() {
        let store = Arc::new(InMemoryStorage::new());
        let client = ScriptedClient {
            not_deployed: true,
            ..Default::default()
        };
        ClientFetchWorker::new(Arc::new(client), store.clone())
            .fetch(3)
            .await
            .unwrap();

        let raw = RawHeightStore::find_by_height(store.as_ref(), 3).await.unwrap().unwrap();
        assert!(raw.validators.is_empty());
    }
}
