//! Setup and Fetch stage tasks: pull raw chain data for the height.
//!
//! When a fetch worker already cached the height's raw data, the fetchers
//! read from that cache instead of the chain client.

use std::sync::Arc;

use async_trait::async_trait;

use chainpipe_core::client::ChainClient;
use chainpipe_core::error::IndexerError;
use chainpipe_core::pipeline::{Patch, RunContext, Task};
use chainpipe_core::store::RawHeightStore;

use super::{
    tolerate_partial, BLOCK_FETCHER, HEIGHT_META_RETRIEVER, TRANSACTIONS_FETCHER,
    VALIDATORS_FETCHER, VALIDATOR_GROUPS_FETCHER,
};
use crate::payload::Payload;

/// Loads epoch/time metadata and snapshots the client request counter.
pub struct HeightMetaRetriever {
    client: Arc<dyn ChainClient>,
    raw: Arc<dyn RawHeightStore>,
}

impl HeightMetaRetriever {
    pub fn new(client: Arc<dyn ChainClient>, raw: Arc<dyn RawHeightStore>) -> Self {
        Self { client, raw }
    }
}

#[async_trait]
impl Task<Payload> for HeightMetaRetriever {
    fn name(&self) -> &'static str {
        HEIGHT_META_RETRIEVER
    }

    async fn run(&self, ctx: &RunContext, _payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let height = ctx.height();
        let request_count_start = self.client.request_count();
        let cached = self.raw.find_by_height(height).await?;
        let meta = match &cached {
            Some(raw) => raw.meta.clone(),
            None => self.client.height_meta(height).await?,
        };
        tracing::debug!(height, epoch = meta.epoch, cached = cached.is_some(), "height metadata loaded");

        Ok(Patch::new(move |p: &mut Payload| {
            p.setup.meta = Some(meta);
            p.setup.request_count_start = request_count_start;
            p.setup.cached = cached;
        }))
    }
}

pub struct BlockFetcher {
    client: Arc<dyn ChainClient>,
}

impl BlockFetcher {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Task<Payload> for BlockFetcher {
    fn name(&self) -> &'static str {
        BLOCK_FETCHER
    }

    fn writes(&self) -> &'static [&'static str] {
        &["raw.block"]
    }

    async fn run(&self, ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let block = match &payload.setup.cached {
            Some(raw) => raw.block.clone(),
            None => tolerate_partial(self.name(), ctx.height(), self.client.block(ctx.height()).await)?,
        };
        Ok(Patch::new(move |p: &mut Payload| p.raw.block = block))
    }
}

pub struct ValidatorsFetcher {
    client: Arc<dyn ChainClient>,
}

impl ValidatorsFetcher {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Task<Payload> for ValidatorsFetcher {
    fn name(&self) -> &'static str {
        VALIDATORS_FETCHER
    }

    fn writes(&self) -> &'static [&'static str] {
        &["raw.validators"]
    }

    async fn run(&self, ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let validators = match &payload.setup.cached {
            Some(raw) => Some(raw.validators.clone()),
            None => tolerate_partial(
                self.name(),
                ctx.height(),
                self.client.validators(ctx.height()).await,
            )?,
        };
        Ok(Patch::new(move |p: &mut Payload| p.raw.validators = validators))
    }
}

pub struct ValidatorGroupsFetcher {
    client: Arc<dyn ChainClient>,
}

impl ValidatorGroupsFetcher {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Task<Payload> for ValidatorGroupsFetcher {
    fn name(&self) -> &'static str {
        VALIDATOR_GROUPS_FETCHER
    }

    fn writes(&self) -> &'static [&'static str] {
        &["raw.validator_groups"]
    }

    async fn run(&self, ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let groups = match &payload.setup.cached {
            Some(raw) => Some(raw.validator_groups.clone()),
            None => tolerate_partial(
                self.name(),
                ctx.height(),
                self.client.validator_groups(ctx.height()).await,
            )?,
        };
        Ok(Patch::new(move |p: &mut Payload| p.raw.validator_groups = groups))
    }
}

pub struct TransactionsFetcher {
    client: Arc<dyn ChainClient>,
}

impl TransactionsFetcher {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Task<Payload> for TransactionsFetcher {
    fn name(&self) -> &'static str {
        TRANSACTIONS_FETCHER
    }

    fn writes(&self) -> &'static [&'static str] {
        &["raw.transactions"]
    }

    async fn run(&self, ctx: &RunContext, payload: &Payload) -> Result<Patch<Payload>, IndexerError> {
        let txs = match &payload.setup.cached {
            Some(raw) => Some(raw.transactions.clone()),
            None => tolerate_partial(
                self.name(),
                ctx.height(),
                self.client.transactions(ctx.height()).await,
            )?,
        };
        Ok(Patch::new(move |p: &mut Payload| p.raw.transactions = txs))
    }
}
