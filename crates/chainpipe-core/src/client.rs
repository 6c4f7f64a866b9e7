//! Chain client contract: everything the pipeline needs from a chain node.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{
    ChainParams, ChainStatus, Height, HeightMeta, Identity, RawBlock, RawTransaction, RawValidator,
    RawValidatorGroup,
};

/// Height- and address-keyed access to on-chain state.
///
/// Implementations classify failures: a missing contract at an early height is
/// [`IndexerError::ContractNotDeployed`] (partial data, non-fatal), transport
/// failures are [`IndexerError::Rpc`] (transient), anything else is fatal.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn status(&self) -> Result<ChainStatus, IndexerError>;

    async fn params(&self) -> Result<ChainParams, IndexerError>;

    async fn height_meta(&self, height: Height) -> Result<HeightMeta, IndexerError>;

    async fn block(&self, height: Height) -> Result<RawBlock, IndexerError>;

    async fn validators(&self, height: Height) -> Result<Vec<RawValidator>, IndexerError>;

    async fn validator_groups(&self, height: Height) -> Result<Vec<RawValidatorGroup>, IndexerError>;

    async fn transactions(&self, height: Height) -> Result<Vec<RawTransaction>, IndexerError>;

    /// Look up the registered identity of `address`; `None` if it has none.
    async fn identity(&self, address: &str, height: Height) -> Result<Option<Identity>, IndexerError>;

    /// Total requests issued by this client so far (per-run RPC accounting).
    fn request_count(&self) -> u64;
}
