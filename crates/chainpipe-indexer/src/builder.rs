//! Fluent builder API for assembling an [`Indexer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainpipe_indexer::{HttpChainClient, HttpClientConfig, IndexerBuilder};
//! use chainpipe_core::{Store, VersionConfig};
//!
//! # fn demo(store: Store) -> Result<(), chainpipe_core::IndexerError> {
//! let indexer = IndexerBuilder::new()
//!     .first_block_height(1_000)
//!     .batch_size(500)
//!     .versions(VersionConfig::from_file("config/indexer_config.json")?)
//!     .client(Arc::new(HttpChainClient::new(
//!         "http://127.0.0.1:8545",
//!         HttpClientConfig::default(),
//!     )?))
//!     .store(store)
//!     .build()?;
//! # Ok(()) }
//! ```

use std::sync::Arc;

use chainpipe_core::client::ChainClient;
use chainpipe_core::config::{AnalyzerConfig, IndexerConfig};
use chainpipe_core::error::IndexerError;
use chainpipe_core::store::Store;
use chainpipe_core::version::VersionConfig;

use crate::indexer::Indexer;

/// Fluent builder for [`Indexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    versions: Option<VersionConfig>,
    client: Option<Arc<dyn ChainClient>>,
    store: Option<Store>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration file.
    pub fn config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the height indexed first on an empty store.
    pub fn first_block_height(mut self, height: u64) -> Self {
        self.config.first_block_height = height;
        self
    }

    /// Set the heights per index run (0 = up to the head).
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.default_batch_size = size;
        self
    }

    pub fn task_max_attempts(mut self, attempts: u32) -> Self {
        self.config.task_max_attempts = attempts;
        self
    }

    pub fn task_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.task_retry_backoff_ms = ms;
        self
    }

    pub fn stage_concurrency(mut self, n: usize) -> Self {
        self.config.stage_concurrency = n;
        self
    }

    pub fn analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.config.analyzer = analyzer;
        self
    }

    /// Set the versioned task configuration. When unset, `build` loads it
    /// from `version_config_path`.
    pub fn versions(mut self, versions: VersionConfig) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn client(mut self, client: Arc<dyn ChainClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Get the built config.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    pub fn build(self) -> Result<Indexer, IndexerError> {
        self.config.validate()?;
        let versions = match self.versions {
            Some(v) => {
                v.validate()?;
                v
            }
            None => VersionConfig::from_file(&self.config.version_config_path)?,
        };
        let client = self
            .client
            .ok_or_else(|| IndexerError::Config("chain client not set".into()))?;
        let store = self
            .store
            .ok_or_else(|| IndexerError::Config("store not set".into()))?;
        Ok(Indexer::new(self.config, versions, client, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::ScriptedClient;
    use chainpipe_storage::InMemoryStorage;

    fn versions() -> VersionConfig {
        VersionConfig::from_json(
            r#"{
                "versions": [{ "id": 1, "targets": [1] }],
                "shared_tasks": ["HeightMetaRetriever"],
                "available_targets": [{ "id": 1, "name": "blocks", "tasks": ["BlockSeqCreator"] }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn builder_sets_config_fields() {
        let config = IndexerBuilder::new()
            .first_block_height(500)
            .batch_size(20)
            .task_max_attempts(5)
            .build_config();
        assert_eq!(config.first_block_height, 500);
        assert_eq!(config.default_batch_size, 20);
        assert_eq!(config.task_max_attempts, 5);
    }

    #[test]
    fn build_requires_client_and_store() {
        let err = IndexerBuilder::new().versions(versions()).build().err().unwrap();
        assert!(matches!(err, IndexerError::Config(ref m) if m.contains("client")));

        let indexer = IndexerBuilder::new()
            .versions(versions())
            .client(Arc::new(ScriptedClient::default()))
            .store(Store::from_backend(Arc::new(InMemoryStorage::new())))
            .build()
            .unwrap();
        assert_eq!(indexer.versions().current_version_id(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = IndexerBuilder::new()
            .stage_concurrency(0)
            .versions(versions())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::Config(_)));
    }
}
