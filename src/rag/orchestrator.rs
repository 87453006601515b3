//! Retrieval-augmented answering.
//!
//! Embeds the query, fetches the nearest chunks, grounds a prompt on them
//! and hands it to the LLM client. `answer` never fails: problems become a
//! short message for the user and a log entry.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::store::{Neighbor, SimilarityStore};
use crate::core::config::RetrievalConfig;
use crate::core::errors::RagError;
use crate::llm::reranker::Reranker;
use crate::llm::schema::ExtractionSchema;
use crate::llm::{Embedder, Message, StructuredClient};

pub const NO_DOCUMENTS_MESSAGE: &str = "No relevant documents found.";
pub const BACKEND_FAILURE_MESSAGE: &str = "An error occurred while getting the model response.";

const QUERY_FENCE: &str = "```";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Neighbor>,
}

pub struct RagOrchestrator {
    embedder: Arc<Embedder>,
    store: Arc<dyn SimilarityStore>,
    llm: Arc<StructuredClient>,
    reranker: Option<Reranker>,
    top_k: usize,
    system_prompt: String,
}

impl RagOrchestrator {
    pub fn new(
        embedder: Arc<Embedder>,
        store: Arc<dyn SimilarityStore>,
        llm: Arc<StructuredClient>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            reranker: None,
            top_k: config.top_k,
            system_prompt: config.system_prompt.clone(),
        }
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Nearest chunks for `query`, reranked when a reranker is attached.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Neighbor>, RagError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let neighbors = self.store.query_top_k(&vector, self.top_k).await?;
        tracing::debug!("Retrieved {} chunks for query", neighbors.len());

        match &self.reranker {
            Some(reranker) if neighbors.len() > 1 => {
                let passages: Vec<String> = neighbors.iter().map(|n| n.text.clone()).collect();
                let ranked = reranker.rank(query, &passages).await;
                Ok(ranked
                    .into_iter()
                    .map(|r| neighbors[r.index].clone())
                    .collect())
            }
            _ => Ok(neighbors),
        }
    }

    /// Grounded prompt: system instructions, then context and the fenced query.
    pub fn build_messages(&self, query: &str, neighbors: &[Neighbor]) -> Vec<Message> {
        let sanitized = query.replace(QUERY_FENCE, "");
        vec![
            Message::system(self.system_prompt.clone()),
            Message::user(format!(
                "Relevant information:\n{}\n\nUser query: {fence}{}{fence}",
                format_context(neighbors),
                sanitized.trim(),
                fence = QUERY_FENCE
            )),
        ]
    }

    /// Answer plus the chunks it was grounded on; `None` when nothing was retrieved.
    pub async fn answer_detailed(&self, query: &str) -> Result<Option<Answer>, RagError> {
        let neighbors = self.retrieve(query).await?;
        if neighbors.is_empty() {
            return Ok(None);
        }

        let mut messages = self.build_messages(query, &neighbors);
        let text = self.llm.complete(&mut messages).await?;
        Ok(Some(Answer {
            text,
            sources: neighbors,
        }))
    }

    /// Grounded generation constrained to `schema`.
    pub async fn answer_structured(
        &self,
        query: &str,
        schema: &ExtractionSchema,
    ) -> Result<Option<Value>, RagError> {
        let neighbors = self.retrieve(query).await?;
        if neighbors.is_empty() {
            return Ok(None);
        }

        let mut messages = self.build_messages(query, &neighbors);
        self.llm
            .generate_structured(&mut messages, Some(schema))
            .await
            .map(Some)
    }

    pub async fn answer(&self, query: &str) -> String {
        match self.answer_detailed(query).await {
            Ok(Some(answer)) => answer.text,
            Ok(None) => NO_DOCUMENTS_MESSAGE.to_string(),
            Err(err) => {
                tracing::error!("Query failed ({}): {}", err.kind(), err);
                BACKEND_FAILURE_MESSAGE.to_string()
            }
        }
    }
}

/// Numbered context block with a source citation per chunk.
pub fn format_context(neighbors: &[Neighbor]) -> String {
    neighbors
        .iter()
        .enumerate()
        .map(|(i, n)| format!("[{}] (Source: {})\n{}", i + 1, n.source_id, n.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
