//! Embedding front-end over an [`EmbeddingBackend`].
//!
//! Enforces the configured vector dimension, labels failures with the
//! offending text and optionally throttles calls with a `governor` quota.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use super::ollama::preview;
use super::provider::EmbeddingBackend;
use crate::core::config::EmbeddingConfig;
use crate::core::errors::RagError;

pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    dimension: usize,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, dimension: usize) -> Self {
        Self {
            backend,
            dimension,
            limiter: None,
        }
    }

    pub fn from_config(backend: Arc<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Self {
        let embedder = Self::new(backend, config.dimension);
        match config.requests_per_second {
            Some(rate) => embedder.with_rate_limit(rate),
            None => embedder,
        }
    }

    /// Caps outgoing embedding calls at `per_second`; zero disables the cap.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second)
            .map(|rate| Quota::per_second(rate).allow_burst(NonZeroU32::MIN))
            .map(|quota| Arc::new(RateLimiter::direct(quota)));
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn supports_batch(&self) -> bool {
        self.backend.supports_batch()
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed_item(&preview(text), text).await
    }

    /// Embeds one text; errors carry `label` as the item identity.
    pub async fn embed_item(&self, label: &str, text: &str) -> Result<Vec<f32>, RagError> {
        self.throttle().await;
        let vector = self
            .backend
            .embed_one(text)
            .await
            .map_err(|err| relabel(label, err))?;
        self.fit(label, vector)
    }

    /// Embeds texts in order.
    ///
    /// Batch-capable backends get one call; others get one call per text,
    /// sequentially.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if !self.backend.supports_batch() {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            return Ok(vectors);
        }

        let batch = format!("batch of {}", texts.len());
        self.throttle().await;
        let vectors = self
            .backend
            .embed_many(texts)
            .await
            .map_err(|err| relabel(&batch, err))?;
        if vectors.len() != texts.len() {
            return Err(RagError::embedding(
                batch,
                format!("backend returned {} vectors", vectors.len()),
            ));
        }

        texts
            .iter()
            .zip(vectors)
            .map(|(text, vector)| self.fit(&preview(text), vector))
            .collect()
    }

    /// Truncates oversized vectors; short or empty ones are errors.
    fn fit(&self, label: &str, mut vector: Vec<f32>) -> Result<Vec<f32>, RagError> {
        if vector.is_empty() {
            return Err(RagError::embedding(label, "backend returned an empty vector"));
        }
        if vector.len() < self.dimension {
            return Err(RagError::embedding(
                label,
                format!(
                    "backend returned {} dimensions, expected {}",
                    vector.len(),
                    self.dimension
                ),
            ));
        }
        vector.truncate(self.dimension);
        Ok(vector)
    }
}

fn relabel(label: &str, err: RagError) -> RagError {
    match err {
        RagError::EmbeddingBackend { message, .. } => RagError::embedding(label, message),
        other => RagError::embedding(label, other),
    }
}
