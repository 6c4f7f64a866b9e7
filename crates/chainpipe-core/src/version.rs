//! Versioned task configuration.
//!
//! Maps each index version to the targets (groups of tasks) it introduced and
//! flags versions whose data must be migrated strictly in height order.
//!
//! ```json
//! {
//!   "versions": [
//!     { "id": 1, "targets": [1, 2], "sequential": false },
//!     { "id": 2, "targets": [3],    "sequential": true }
//!   ],
//!   "shared_tasks": ["HeightMetaRetriever", "BlockFetcher"],
//!   "available_targets": [
//!     { "id": 1, "name": "index_blocks", "desc": "block sequences", "tasks": ["BlockSeqCreator"] }
//!   ]
//! }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: u64,
    pub targets: Vec<u64>,
    /// Data indexed before this version must be reindexed in height order.
    #[serde(default)]
    pub sequential: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub tasks: Vec<String>,
}

/// Parsed versioned task configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConfig {
    pub versions: Vec<Version>,
    /// Tasks active at every version (setup, fetching, parsing, syncing).
    #[serde(default)]
    pub shared_tasks: Vec<String>,
    pub available_targets: Vec<Target>,
}

impl VersionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, IndexerError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| IndexerError::Config(format!("version config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.versions.is_empty() {
            return Err(IndexerError::Config("version config has no versions".into()));
        }
        let mut seen = HashSet::new();
        for version in &self.versions {
            if !seen.insert(version.id) {
                return Err(IndexerError::Config(format!("duplicate version id {}", version.id)));
            }
            for target in &version.targets {
                if self.target(*target).is_none() {
                    return Err(IndexerError::Config(format!(
                        "version {} references unknown target {target}",
                        version.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// The version new data is indexed with: the highest configured id.
    pub fn current_version_id(&self) -> u64 {
        self.versions.iter().map(|v| v.id).max().unwrap_or(0)
    }

    /// All configured version ids, ascending.
    pub fn all_version_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.versions.iter().map(|v| v.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Versions newer than `stored` up to the current one, i.e. the migrations
    /// heights indexed at `stored` are missing.
    pub fn versions_after(&self, stored: u64) -> Vec<u64> {
        self.all_version_ids()
            .into_iter()
            .filter(|id| *id > stored)
            .collect()
    }

    pub fn is_any_version_sequential(&self, ids: &[u64]) -> bool {
        self.versions
            .iter()
            .any(|v| v.sequential && ids.contains(&v.id))
    }

    pub fn target(&self, id: u64) -> Option<&Target> {
        self.available_targets.iter().find(|t| t.id == id)
    }

    /// Shared tasks plus every task of every target of the given versions.
    pub fn tasks_for_versions(&self, ids: &[u64]) -> Result<BTreeSet<String>, IndexerError> {
        let mut targets = Vec::new();
        for id in ids {
            let version = self
                .versions
                .iter()
                .find(|v| v.id == *id)
                .ok_or_else(|| IndexerError::Config(format!("unknown version id {id}")))?;
            targets.extend(version.targets.iter().copied());
        }
        self.tasks_for_targets(&targets)
    }

    /// Shared tasks plus every task of the given targets.
    pub fn tasks_for_targets(&self, ids: &[u64]) -> Result<BTreeSet<String>, IndexerError> {
        let mut tasks: BTreeSet<String> = self.shared_tasks.iter().cloned().collect();
        for id in ids {
            let target = self
                .target(*id)
                .ok_or_else(|| IndexerError::Config(format!("unknown target id {id}")))?;
            tasks.extend(target.tasks.iter().cloned());
        }
        Ok(tasks)
    }

    pub fn all_tasks(&self) -> BTreeSet<String> {
        let mut tasks: BTreeSet<String> = self.shared_tasks.iter().cloned().collect();
        for target in &self.available_targets {
            tasks.extend(target.tasks.iter().cloned());
        }
        tasks
    }
}
