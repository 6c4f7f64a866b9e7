//! JSON-RPC 2.0 chain client over HTTP, backed by `reqwest`.
//!
//! Talks to a chain proxy exposing one method per [`ChainClient`] call. Errors
//! are classified for the pipeline: transport failures become
//! [`IndexerError::Rpc`] (retried), timeouts [`IndexerError::Timeout`], and the
//! proxy's "contract not deployed" code becomes
//! [`IndexerError::ContractNotDeployed`] (partial data).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainpipe_core::client::ChainClient;
use chainpipe_core::error::IndexerError;
use chainpipe_core::types::{
    ChainParams, ChainStatus, Height, HeightMeta, Identity, RawBlock, RawTransaction, RawValidator,
    RawValidatorGroup,
};

/// JSON-RPC error code the proxy uses when a contract is not deployed yet.
pub const CONTRACT_NOT_DEPLOYED_CODE: i64 = -32010;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Configuration for [`HttpChainClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC implementation of [`ChainClient`].
pub struct HttpChainClient {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    requests: AtomicU64,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("building http client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            request_timeout: config.request_timeout,
            requests: AtomicU64::new(0),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, HttpClientConfig::default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        height: Option<Height>,
    ) -> Result<T, IndexerError> {
        let id = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("{method}: HTTP {status}: {body}")));
        }

        let body: JsonRpcResponse = resp.json().await.map_err(|e| self.transport_error(e))?;

        if let Some(err) = body.error {
            return Err(classify_rpc_error(method, err, height));
        }

        let result = body.result.unwrap_or(Value::Null);
        tracing::trace!(method, id, "rpc call complete");
        serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("{method}: malformed result: {e}")))
    }

    fn transport_error(&self, e: reqwest::Error) -> IndexerError {
        if e.is_timeout() {
            IndexerError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            IndexerError::Rpc(e.to_string())
        }
    }
}

fn classify_rpc_error(method: &str, err: JsonRpcError, height: Option<Height>) -> IndexerError {
    if err.code == CONTRACT_NOT_DEPLOYED_CODE {
        let contract = err
            .data
            .as_ref()
            .and_then(|d| d.get("contract"))
            .and_then(Value::as_str)
            .unwrap_or(method)
            .to_string();
        return IndexerError::ContractNotDeployed {
            contract,
            height: height.unwrap_or_default(),
        };
    }
    IndexerError::Task {
        task: method.to_string(),
        reason: format!("JSON-RPC error {}: {}", err.code, err.message),
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn status(&self) -> Result<ChainStatus, IndexerError> {
        self.call("chain_status", json!([]), None).await
    }

    async fn params(&self) -> Result<ChainParams, IndexerError> {
        self.call("chain_params", json!([]), None).await
    }

    async fn height_meta(&self, height: Height) -> Result<HeightMeta, IndexerError> {
        self.call("height_meta", json!([height]), Some(height)).await
    }

    async fn block(&self, height: Height) -> Result<RawBlock, IndexerError> {
        self.call("block_get", json!([height]), Some(height)).await
    }

    async fn validators(&self, height: Height) -> Result<Vec<RawValidator>, IndexerError> {
        self.call("validators_get", json!([height]), Some(height)).await
    }

    async fn validator_groups(&self, height: Height) -> Result<Vec<RawValidatorGroup>, IndexerError> {
        self.call("validator_groups_get", json!([height]), Some(height))
            .await
    }

    async fn transactions(&self, height: Height) -> Result<Vec<RawTransaction>, IndexerError> {
        self.call("transactions_get", json!([height]), Some(height)).await
    }

    async fn identity(&self, address: &str, height: Height) -> Result<Option<Identity>, IndexerError> {
        self.call("identity_get", json!([address, height]), Some(height))
            .await
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}
