//! LLM-judged relevance reranking.

use std::cmp::Ordering;
use std::sync::Arc;

use super::schema::{ExtractionSchema, RelevanceScore};
use super::structured::StructuredClient;
use super::types::Message;
use crate::core::errors::RagError;

const RERANK_SYSTEM_PROMPT: &str = "You judge how well a passage answers a query. \
Score 1.0 when the passage fully answers it, 0.0 when it is unrelated.";

#[derive(Debug, Clone, PartialEq)]
pub struct RankedPassage {
    /// Position of the passage in the input slice.
    pub index: usize,
    pub passage: String,
    pub score: f64,
}

pub struct Reranker {
    client: Arc<StructuredClient>,
    schema: ExtractionSchema,
}

impl Reranker {
    pub fn new(client: Arc<StructuredClient>) -> Result<Self, RagError> {
        Ok(Self {
            client,
            schema: ExtractionSchema::for_type::<RelevanceScore>()?,
        })
    }

    /// Scores each passage against `query` and sorts by descending score.
    ///
    /// Passages are scored one at a time. A passage whose score cannot be
    /// obtained gets 0.0; equal scores keep their input order.
    pub async fn rank(&self, query: &str, passages: &[String]) -> Vec<RankedPassage> {
        let mut ranked = Vec::with_capacity(passages.len());
        for (index, passage) in passages.iter().enumerate() {
            let score = self.score(query, passage).await;
            ranked.push(RankedPassage {
                index,
                passage: passage.clone(),
                score,
            });
        }

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked
    }

    async fn score(&self, query: &str, passage: &str) -> f64 {
        let mut messages = vec![
            Message::system(RERANK_SYSTEM_PROMPT),
            Message::user(format!("QUERY:\n{}\n\nPASSAGE:\n{}", query, passage)),
        ];

        match self
            .client
            .generate_structured(&mut messages, Some(&self.schema))
            .await
        {
            Ok(value) => value
                .get("relevance_score")
                .and_then(|v| v.as_f64())
                .filter(|score| score.is_finite())
                .unwrap_or(0.0),
            Err(err) => {
                tracing::warn!("Reranker could not score passage: {}", err);
                0.0
            }
        }
    }
}
