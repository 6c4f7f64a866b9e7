//! Error types for the chainpipe indexing pipeline.

use thiserror::Error;

/// Errors that can occur while indexing, backfilling or dispatching fetch jobs.
#[derive(Debug, Clone, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A contract the request depends on is not deployed at the requested height.
    #[error("contract {contract} not yet deployed at height {height}")]
    ContractNotDeployed { contract: String, height: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid {record}: {reason}")]
    Validation { record: String, reason: String },

    #[error("cannot run backfill: database is empty")]
    DatabaseEmpty,

    #[error("cannot run {run}: sequential reindex required for versions {versions:?}")]
    SequentialVersionPending { run: String, versions: Vec<u64> },

    #[error("reindexing already in process [kind={kind}] (use force to override it)")]
    ReindexInProgress { kind: String },

    #[error("nothing to process: {0}")]
    NothingToProcess(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("task '{task}' failed: {reason}")]
    Task { task: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for network, RPC and persistence hiccups worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_) | Self::Timeout { .. })
    }

    /// Returns `true` if the error only means the data does not exist yet at this height.
    pub fn is_partial_data(&self) -> bool {
        matches!(self, Self::ContractNotDeployed { .. })
    }

    /// Returns `true` for refusals raised before any stage executes.
    pub fn is_coordination(&self) -> bool {
        matches!(
            self,
            Self::DatabaseEmpty
                | Self::SequentialVersionPending { .. }
                | Self::ReindexInProgress { .. }
                | Self::NothingToProcess(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn validation(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            record: record.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Other(format!("serialization: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(IndexerError::Rpc("reset".into()).is_transient());
        assert!(IndexerError::Storage("locked".into()).is_transient());
        assert!(!IndexerError::validation("block", "missing hash").is_transient());
        assert!(IndexerError::ContractNotDeployed {
            contract: "Election".into(),
            height: 10
        }
        .is_partial_data());
        assert!(IndexerError::DatabaseEmpty.is_coordination());
        assert!(!IndexerError::Cancelled.is_coordination());
    }

    #[test]
    fn refusal_messages_name_the_reason() {
        let e = IndexerError::ReindexInProgress {
            kind: "parallel_reindex".into(),
        };
        assert!(e.to_string().contains("kind=parallel_reindex"));
        assert!(e.to_string().contains("force"));
        assert_eq!(
            IndexerError::DatabaseEmpty.to_string(),
            "cannot run backfill: database is empty"
        );
    }
}
