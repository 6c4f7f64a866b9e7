//! Indexer configuration.
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! `{}`) is valid. `CHAINPIPE_CHAIN_RPC_URL` and `CHAINPIPE_DATABASE_URL`
//! override the matching fields when set.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::IndexerError;

/// Top-level configuration for an indexer process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// JSON-RPC endpoint of the chain proxy.
    pub chain_rpc_url: String,
    /// Storage URL, e.g. `"sqlite:./chainpipe.db"` or `"memory"`.
    pub database_url: String,
    /// First height ever indexed when the store is empty.
    pub first_block_height: u64,
    /// Heights per `index` run when no batch size is given (0 = up to head).
    pub default_batch_size: u64,
    /// Path of the versioned task configuration.
    pub version_config_path: String,
    /// Attempts per task (first try included) on transient errors.
    pub task_max_attempts: u32,
    /// Delay before the first task retry; doubles per attempt.
    pub task_retry_backoff_ms: u64,
    /// Maximum tasks in flight inside one concurrent stage.
    pub stage_concurrency: usize,
    pub analyzer: AnalyzerConfig,
    pub jobs: JobsConfig,
    pub purge: PurgeConfig,
    pub log: LogConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain_rpc_url: "http://127.0.0.1:8545".into(),
            database_url: "sqlite:./chainpipe.db".into(),
            first_block_height: 1,
            default_batch_size: 0,
            version_config_path: "config/indexer_config.json".into(),
            task_max_attempts: 3,
            task_retry_backoff_ms: 200,
            stage_concurrency: 8,
            analyzer: AnalyzerConfig::default(),
            jobs: JobsConfig::default(),
            purge: PurgeConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Read and parse a config file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("reading {}: {e}", path.display())))?;
        let mut config: Self = serde_json::from_str(&raw)
            .map_err(|e| IndexerError::Config(format!("parsing {}: {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `CHAINPIPE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CHAINPIPE_CHAIN_RPC_URL") {
            self.chain_rpc_url = url;
        }
        if let Ok(url) = std::env::var("CHAINPIPE_DATABASE_URL") {
            self.database_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.task_max_attempts == 0 {
            return Err(IndexerError::Config("task_max_attempts must be at least 1".into()));
        }
        if self.stage_concurrency == 0 {
            return Err(IndexerError::Config("stage_concurrency must be at least 1".into()));
        }
        if self.jobs.concurrency == 0 {
            return Err(IndexerError::Config("jobs.concurrency must be at least 1".into()));
        }
        self.analyzer.validate()
    }

    pub fn task_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.task_retry_backoff_ms)
    }
}

/// Thresholds for the system event analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Prior validator sequences considered by the missed-block window.
    pub max_validator_sequences: usize,
    /// Unsigned heights within the window that trigger a "missed N of M" event.
    pub missed_for_max_threshold: usize,
    /// Consecutive unsigned heights that trigger a "missed N consecutive" event.
    pub missed_in_row_threshold: usize,
    /// Account activity kind compared epoch over epoch for reward changes.
    pub reward_activity_kind: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_validator_sequences: 1000,
            missed_for_max_threshold: 50,
            missed_in_row_threshold: 50,
            reward_activity_kind: "EpochRewardsDistributedToVoters".into(),
        }
    }
}

impl AnalyzerConfig {
    fn validate(&self) -> Result<(), IndexerError> {
        if self.missed_for_max_threshold == 0 || self.missed_in_row_threshold == 0 {
            return Err(IndexerError::Config("analyzer thresholds must be at least 1".into()));
        }
        if self.missed_in_row_threshold > self.max_validator_sequences + 1 {
            return Err(IndexerError::Config(
                "analyzer.missed_in_row_threshold cannot exceed the validator window".into(),
            ));
        }
        Ok(())
    }
}

/// Fetch job manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Jobs created per batch when the queue runs dry.
    pub batch_size: u64,
    /// Fetch workers in flight per dispatch round.
    pub concurrency: usize,
    /// Pause between dispatch rounds.
    pub poll_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 10,
            poll_interval_ms: 1_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 5 * 60 * 1_000,
        }
    }
}

impl JobsConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retention windows for the purge use case (0 disables a purge).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub block_sequences_retention_hours: u64,
    pub validator_sequences_retention_hours: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            block_sequences_retention_hours: 24 * 30,
            validator_sequences_retention_hours: 24 * 30,
        }
    }
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Build an `EnvFilter` directive string: `"info,chainpipe_indexer=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: IndexerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.task_max_attempts, 3);
        assert_eq!(cfg.analyzer.missed_in_row_threshold, 50);
        assert_eq!(cfg.jobs.concurrency, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: IndexerConfig = serde_json::from_str(
            r#"{"first_block_height": 500, "analyzer": {"missed_in_row_threshold": 3}}"#,
        )
        .unwrap();
        assert_eq!(cfg.first_block_height, 500);
        assert_eq!(cfg.analyzer.missed_in_row_threshold, 3);
        assert_eq!(cfg.analyzer.missed_for_max_threshold, 50);
    }

    #[test]
    fn zero_attempts_rejected() {
        let cfg = IndexerConfig {
            task_max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn log_directives_include_components() {
        let mut log = LogConfig::default();
        log.components.insert("chainpipe-indexer".into(), "debug".into());
        assert_eq!(log.directives(), "info,chainpipe_indexer=debug");
    }
}
