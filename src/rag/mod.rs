//! Retrieval-augmented generation pipeline.
//!
//! - `chunker`: word-window chunking
//! - `store`, `sqlite`, `pgvector`: similarity stores
//! - `ingest`: documents into the store
//! - `orchestrator`: grounded answers out of it

pub mod chunker;
pub mod distance;
pub mod ingest;
pub mod orchestrator;
pub mod pgvector;
pub mod sqlite;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

pub use chunker::{Chunk, Chunker};
pub use ingest::{IngestReport, IngestionPipeline};
pub use orchestrator::{Answer, RagOrchestrator};
pub use store::{Neighbor, SimilarityStore, StoredRecord};

use crate::core::config::{AppPaths, StoreBackend, StoreConfig};
use crate::core::errors::RagError;

/// Opens and prepares the configured store for `dimension`-sized vectors.
pub async fn open_store(
    config: &StoreConfig,
    paths: &AppPaths,
    dimension: usize,
) -> Result<Arc<dyn SimilarityStore>, RagError> {
    let store: Arc<dyn SimilarityStore> = match config.backend {
        StoreBackend::Sqlite => {
            let path = config
                .sqlite_path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| paths.default_sqlite_path());
            Arc::new(
                sqlite::SqliteSimilarityStore::with_path(
                    path,
                    &config.table,
                    dimension,
                    config.metric,
                    config.max_connections,
                )
                .await?,
            )
        }
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                RagError::Configuration(
                    "store.database_url (or POSTGRES_* variables) required for the postgres backend"
                        .to_string(),
                )
            })?;
            Arc::new(
                pgvector::PgVectorStore::connect(
                    url,
                    &config.table,
                    dimension,
                    config.metric,
                    config.max_connections,
                )
                .await?,
            )
        }
    };

    store.prepare().await?;
    tracing::info!(
        "Using {} store, table '{}' ({} dims, {:?})",
        store.name(),
        config.table,
        dimension,
        config.metric
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_store_opens_under_the_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_roots(root.path().to_path_buf(), root.path().join("data"));

        let store = open_store(&StoreConfig::default(), &paths, 4).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        assert_eq!(store.dimension(), 4);
        assert!(paths.default_sqlite_path().exists());
    }

    #[tokio::test]
    async fn postgres_without_url_is_a_configuration_error() {
        let root = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_roots(root.path().to_path_buf(), root.path().join("data"));
        let config = StoreConfig {
            backend: StoreBackend::Postgres,
            ..StoreConfig::default()
        };

        assert!(matches!(
            open_store(&config, &paths, 4).await,
            Err(RagError::Configuration(_))
        ));
    }
}
