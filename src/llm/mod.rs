pub mod embedder;
pub mod lmstudio;
pub mod normalize;
pub mod ollama;
pub mod provider;
pub mod reranker;
pub mod schema;
pub mod structured;
pub mod types;

use std::sync::Arc;

pub use embedder::Embedder;
pub use provider::{model_available, EmbeddingBackend, GenerationBackend};
pub use structured::StructuredClient;
pub use types::{Message, Role};

use crate::core::config::{EmbeddingConfig, GenerationConfig, ProviderKind};
use crate::core::errors::RagError;

pub fn build_generation_backend(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationBackend>, RagError> {
    let backend: Arc<dyn GenerationBackend> = match config.provider {
        ProviderKind::Ollama => Arc::new(ollama::OllamaGenerator::from_config(config)?),
        ProviderKind::Lmstudio => Arc::new(lmstudio::LmStudioGenerator::from_config(config)?),
    };
    tracing::debug!("Generation backend: {} at {}", backend.name(), config.base_url());
    Ok(backend)
}

pub fn build_embedding_backend(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingBackend>, RagError> {
    let backend: Arc<dyn EmbeddingBackend> = match config.provider {
        ProviderKind::Ollama => Arc::new(ollama::OllamaEmbedder::from_config(config)?),
        ProviderKind::Lmstudio => Arc::new(lmstudio::LmStudioEmbedder::from_config(config)?),
    };
    tracing::debug!("Embedding backend: {} at {}", backend.name(), config.base_url());
    Ok(backend)
}
