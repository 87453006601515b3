use std::sync::Arc;

use crate::core::config::{AppPaths, ConfigService, GenerationConfig, RagConfig};
use crate::llm::reranker::Reranker;
use crate::llm::{
    build_embedding_backend, build_generation_backend, Embedder, GenerationBackend,
    StructuredClient,
};
use crate::rag::{open_store, Chunker, IngestionPipeline, RagOrchestrator, SimilarityStore};
use crate::sources::{SitemapClient, SourceExtractor};

pub mod error;

use error::InitializationError;

const WEB_TIMEOUT_SECS: u64 = 30;

/// Configuration plus the backends built from it.
///
/// Construction does no network I/O; the store is opened on demand so
/// commands that never touch it (e.g. listing models) need no database.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config_service: ConfigService,
    pub config: Arc<RagConfig>,
    pub generation: Arc<dyn GenerationBackend>,
    pub embedder: Arc<Embedder>,
    pub llm: Arc<StructuredClient>,
}

impl AppState {
    pub fn initialize() -> Result<Self, InitializationError> {
        Self::with_paths(Arc::new(AppPaths::new()))
    }

    pub fn with_paths(paths: Arc<AppPaths>) -> Result<Self, InitializationError> {
        let config_service = ConfigService::new(paths.clone());
        let config = config_service.load().map_err(InitializationError::Config)?;
        Self::from_config(paths, config_service, config)
    }

    pub fn from_config(
        paths: Arc<AppPaths>,
        config_service: ConfigService,
        config: RagConfig,
    ) -> Result<Self, InitializationError> {
        let generation =
            build_generation_backend(&config.generation).map_err(InitializationError::Llm)?;
        let embedding_backend =
            build_embedding_backend(&config.embedding).map_err(InitializationError::Llm)?;

        let embedder = Arc::new(Embedder::from_config(embedding_backend, &config.embedding));
        let llm = Arc::new(StructuredClient::new(
            generation.clone(),
            config.generation.clone(),
        ));

        Ok(Self {
            paths,
            config_service,
            config: Arc::new(config),
            generation,
            embedder,
            llm,
        })
    }

    pub async fn open_store(&self) -> Result<Arc<dyn SimilarityStore>, InitializationError> {
        open_store(&self.config.store, &self.paths, self.config.embedding.dimension)
            .await
            .map_err(InitializationError::Store)
    }

    pub async fn ingestion_pipeline(&self) -> Result<IngestionPipeline, InitializationError> {
        let chunker = Chunker::from_config(&self.config.chunking).map_err(InitializationError::Config)?;
        let extractor =
            SourceExtractor::new(WEB_TIMEOUT_SECS).map_err(InitializationError::Sources)?;
        let store = self.open_store().await?;

        Ok(IngestionPipeline::new(
            chunker,
            self.embedder.clone(),
            store,
            Arc::new(extractor),
        ))
    }

    /// Backend that can list the models of the embedding server.
    ///
    /// Reuses the generation backend when both point at the same server.
    pub fn embedding_catalog(&self) -> Result<Arc<dyn GenerationBackend>, InitializationError> {
        let embedding = &self.config.embedding;
        let generation = &self.config.generation;
        if embedding.provider == generation.provider && embedding.base_url() == generation.base_url() {
            return Ok(self.generation.clone());
        }

        let config = GenerationConfig {
            provider: embedding.provider,
            base_url: Some(embedding.base_url().to_string()),
            timeout_secs: embedding.timeout_secs,
            ..GenerationConfig::default()
        };
        build_generation_backend(&config).map_err(InitializationError::Llm)
    }

    pub fn sitemap_client(&self) -> Result<SitemapClient, InitializationError> {
        SitemapClient::new(WEB_TIMEOUT_SECS).map_err(InitializationError::Sources)
    }

    pub async fn orchestrator(&self) -> Result<RagOrchestrator, InitializationError> {
        let store = self.open_store().await?;
        let orchestrator = RagOrchestrator::new(
            self.embedder.clone(),
            store,
            self.llm.clone(),
            &self.config.retrieval,
        );

        if self.config.retrieval.rerank {
            let reranker = Reranker::new(self.llm.clone()).map_err(InitializationError::Llm)?;
            Ok(orchestrator.with_reranker(reranker))
        } else {
            Ok(orchestrator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProviderKind;

    #[tokio::test]
    async fn builds_backends_from_config_without_network() {
        let root = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_roots(
            root.path().to_path_buf(),
            root.path().join("data"),
        ));
        let mut config = RagConfig::default();
        config.embedding.provider = ProviderKind::Lmstudio;
        config.embedding.dimension = 8;

        let state = AppState::from_config(paths.clone(), ConfigService::new(paths), config).unwrap();
        assert_eq!(state.generation.name(), "ollama");
        assert_eq!(state.embedder.backend_name(), "lmstudio");
        assert!(state.embedder.supports_batch());

        let store = state.open_store().await.unwrap();
        assert_eq!(store.dimension(), 8);
        assert!(state.orchestrator().await.is_ok());
    }

    #[test]
    fn embedding_models_are_listed_on_the_embedding_server() {
        let root = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_roots(
            root.path().to_path_buf(),
            root.path().join("data"),
        ));

        let shared = AppState::from_config(
            paths.clone(),
            ConfigService::new(paths.clone()),
            RagConfig::default(),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&shared.embedding_catalog().unwrap(), &shared.generation));

        let mut config = RagConfig::default();
        config.embedding.provider = ProviderKind::Lmstudio;
        let split = AppState::from_config(paths.clone(), ConfigService::new(paths.clone()), config).unwrap();
        assert_eq!(split.embedding_catalog().unwrap().name(), "lmstudio");

        let mut config = RagConfig::default();
        config.embedding.base_url = Some("http://embed-box:11434".to_string());
        let elsewhere = AppState::from_config(paths.clone(), ConfigService::new(paths), config).unwrap();
        assert!(!Arc::ptr_eq(&elsewhere.embedding_catalog().unwrap(), &elsewhere.generation));
    }
}
