use async_trait::async_trait;

use super::types::{GenerationRequest, ProviderModel};
use crate::core::errors::RagError;

/// A text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// provider name (e.g. "ollama", "lmstudio")
    fn name(&self) -> &str;

    /// whether the service answers at all
    async fn health_check(&self) -> Result<bool, RagError>;

    /// models the service can run
    async fn list_models(&self) -> Result<Vec<ProviderModel>, RagError>;

    /// one non-streaming completion; returns the raw text
    async fn generate(&self, request: &GenerationRequest) -> Result<String, RagError>;
}

/// A text-to-vector service.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `embed_many` sends a single request for the whole batch.
    fn supports_batch(&self) -> bool {
        false
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Batch embedding; the default issues one call per text, in order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }
        Ok(vectors)
    }
}

/// Checks whether `model` is served, accepting a missing `:latest` tag.
pub async fn model_available(
    backend: &dyn GenerationBackend,
    model: &str,
) -> Result<bool, RagError> {
    let models = backend.list_models().await?;
    Ok(models.iter().any(|m| same_model(&m.id, model)))
}

fn same_model(listed: &str, wanted: &str) -> bool {
    let strip = |name: &str| name.strip_suffix(":latest").unwrap_or(name).to_string();
    listed == wanted || strip(listed) == strip(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_tag_is_optional_when_matching_models() {
        assert!(same_model("nomic-embed-text:latest", "nomic-embed-text"));
        assert!(same_model("qwen2.5vl:7b", "qwen2.5vl:7b"));
        assert!(!same_model("qwen2.5vl:7b", "qwen2.5vl"));
    }
}
