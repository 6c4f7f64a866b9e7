//! Version bookkeeping of the store and the run-eligibility rules built on it.
//!
//! The store is *pristine* when no height was ever synced and *up to date*
//! when no stored height predates the current index version. Heights indexed
//! at version `v` are missing every configured version above `v`.

use chainpipe_core::error::IndexerError;
use chainpipe_core::store::SyncableStore;
use chainpipe_core::version::VersionConfig;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionStatus {
    pub current_version: u64,
    /// Oldest index version among stored heights; `None` when pristine.
    pub smallest_stored_version: Option<u64>,
    /// Versions the oldest stored heights have not been processed with.
    pub missing_versions: Vec<u64>,
    /// Whether any missing version must be migrated in height order.
    pub sequential_pending: bool,
}

impl VersionStatus {
    pub async fn load(syncables: &dyn SyncableStore, versions: &VersionConfig) -> Result<Self, IndexerError> {
        let smallest = syncables.find_smallest_index_version().await?;
        Ok(Self::from_parts(versions, smallest))
    }

    pub fn from_parts(versions: &VersionConfig, smallest_stored_version: Option<u64>) -> Self {
        let missing_versions = smallest_stored_version
            .map(|v| versions.versions_after(v))
            .unwrap_or_default();
        Self {
            current_version: versions.current_version_id(),
            sequential_pending: versions.is_any_version_sequential(&missing_versions),
            smallest_stored_version,
            missing_versions,
        }
    }

    pub fn is_pristine(&self) -> bool {
        self.smallest_stored_version.is_none()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.missing_versions.is_empty()
    }

    /// A live index run must wait for pending sequential migrations.
    pub fn can_index(&self) -> Result<(), IndexerError> {
        if !self.is_up_to_date() && self.sequential_pending {
            return Err(IndexerError::SequentialVersionPending {
                run: "index".into(),
                versions: self.missing_versions.clone(),
            });
        }
        Ok(())
    }

    pub fn can_backfill(&self, parallel: bool) -> Result<(), IndexerError> {
        if self.is_pristine() {
            return Err(IndexerError::DatabaseEmpty);
        }
        if parallel && self.sequential_pending {
            return Err(IndexerError::SequentialVersionPending {
                run: "parallel reindex".into(),
                versions: self.missing_versions.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions() -> VersionConfig {
        VersionConfig::from_json(
            r#"{
                "versions": [
                    { "id": 1, "targets": [1] },
                    { "id": 2, "targets": [2], "sequential": true },
                    { "id": 3, "targets": [3] }
                ],
                "shared_tasks": ["HeightMetaRetriever"],
                "available_targets": [
                    { "id": 1, "name": "blocks", "tasks": ["BlockSeqCreator"] },
                    { "id": 2, "name": "validators", "tasks": ["ValidatorSeqCreator"] },
                    { "id": 3, "name": "events", "tasks": ["SystemEventCreator"] }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn pristine_store_indexes_but_cannot_backfill() {
        let status = VersionStatus::from_parts(&versions(), None);
        assert!(status.is_pristine());
        assert!(status.is_up_to_date());
        assert!(status.can_index().is_ok());
        assert!(matches!(status.can_backfill(false), Err(IndexerError::DatabaseEmpty)));
        assert!(matches!(status.can_backfill(true), Err(IndexerError::DatabaseEmpty)));
    }

    #[test]
    fn pending_sequential_version_blocks_index_and_parallel_backfill() {
        let status = VersionStatus::from_parts(&versions(), Some(1));
        assert_eq!(status.missing_versions, vec![2, 3]);
        assert!(matches!(
            status.can_index(),
            Err(IndexerError::SequentialVersionPending { ref versions, .. }) if versions == &vec![2, 3]
        ));
        assert!(status.can_backfill(false).is_ok());
        assert!(status.can_backfill(true).is_err());
    }

    #[test]
    fn non_sequential_gap_allows_everything() {
        let status = VersionStatus::from_parts(&versions(), Some(2));
        assert_eq!(status.missing_versions, vec![3]);
        assert!(!status.is_up_to_date());
        assert!(status.can_index().is_ok());
        assert!(status.can_backfill(true).is_ok());
    }

    #[test]
    fn up_to_date_store() {
        let status = VersionStatus::from_parts(&versions(), Some(3));
        assert!(status.is_up_to_date());
        assert!(status.can_index().is_ok());
        assert!(status.can_backfill(true).is_ok());
    }
}
