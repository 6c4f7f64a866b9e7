//! Height sources for index and backfill runs.

use chainpipe_core::client::ChainClient;
use chainpipe_core::error::IndexerError;
use chainpipe_core::pipeline::{HeightRange, Source};
use chainpipe_core::store::SyncableStore;
use chainpipe_core::types::Height;

/// Contiguous heights from the last synced height up to the chain head.
#[derive(Debug, Clone)]
pub struct RangeSource {
    range: HeightRange,
}

impl RangeSource {
    /// `start_height` overrides the resume point; `batch_size` of 0 means
    /// "up to the head".
    pub async fn new(
        syncables: &dyn SyncableStore,
        client: &dyn ChainClient,
        start_height: Option<Height>,
        batch_size: u64,
        first_block_height: Height,
    ) -> Result<Self, IndexerError> {
        let start = match start_height {
            Some(h) => h,
            None => match syncables.find_most_recent().await? {
                // An unprocessed tail height failed mid-run; redo it.
                Some(s) if !s.is_processed() => s.height,
                Some(s) => s.height + 1,
                None => first_block_height,
            },
        };
        let head = client.status().await?.latest_height;
        let end = if batch_size > 0 {
            head.min(start.saturating_add(batch_size - 1))
        } else {
            head
        };
        tracing::debug!(start, end, head, batch_size, "range source bounds");
        Ok(Self {
            range: HeightRange::new(start, end)?,
        })
    }

    pub fn from_bounds(start: Height, end: Height) -> Result<Self, IndexerError> {
        Ok(Self {
            range: HeightRange::new(start, end)?,
        })
    }
}

/// Heights whose stored index version differs from the target version,
/// bounded by the first and most recent such height.
#[derive(Debug, Clone)]
pub struct DiffSource {
    range: HeightRange,
}

impl DiffSource {
    pub async fn new(syncables: &dyn SyncableStore, version: u64) -> Result<Self, IndexerError> {
        let first = syncables.find_first_by_different_index_version(version).await?;
        let last = syncables
            .find_most_recent_by_different_index_version(version)
            .await?;
        match (first, last) {
            (Some(first), Some(last)) => {
                tracing::debug!(start = first.height, end = last.height, version, "diff source bounds");
                Ok(Self {
                    range: HeightRange::new(first.height, last.height)?,
                })
            }
            _ => Err(IndexerError::NothingToProcess(format!(
                "every height is already at index version {version}"
            ))),
        }
    }
}

macro_rules! delegate_source {
    ($ty:ty) => {
        impl Source for $ty {
            fn next_height(&mut self) -> Option<Height> {
                self.range.next_height()
            }

            fn current(&self) -> Option<Height> {
                self.range.current()
            }

            fn start_height(&self) -> Height {
                self.range.start_height()
            }

            fn end_height(&self) -> Height {
                self.range.end_height()
            }

            fn len(&self) -> u64 {
                self.range.len()
            }

            fn err(&self) -> Option<&IndexerError> {
                self.range.err()
            }
        }
    };
}

delegate_source!(RangeSource);
delegate_source!(DiffSource);
