//! chainpipe-storage — pluggable storage backends for ChainPipe.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, dry runs, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement every repository trait in [`chainpipe_core::store`], so a
//! backend is turned into a [`Store`] with [`Store::from_backend`].

use std::sync::Arc;

use chainpipe_core::error::IndexerError;
use chainpipe_core::store::Store;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

/// Open the backend named by a database URL.
///
/// `memory` / `memory://` selects the in-memory backend; anything else is
/// handed to SQLite (when the `sqlite` feature is enabled).
pub async fn connect(database_url: &str) -> Result<Store, IndexerError> {
    if database_url == "memory" || database_url.starts_with("memory:") {
        tracing::info!("using in-memory storage");
        return Ok(Store::from_backend(Arc::new(InMemoryStorage::new())));
    }
    open_sqlite(database_url).await
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(database_url: &str) -> Result<Store, IndexerError> {
    let backend = sqlite::SqliteStorage::open(database_url).await?;
    tracing::info!(url = database_url, "using sqlite storage");
    Ok(Store::from_backend(Arc::new(backend)))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(database_url: &str) -> Result<Store, IndexerError> {
    Err(IndexerError::Config(format!(
        "database url {database_url} needs the `sqlite` feature"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_url_selects_in_memory_backend() {
        let store = connect("memory").await.unwrap();
        assert!(store.syncables.find_most_recent().await.unwrap().is_none());
    }
}
