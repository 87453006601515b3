//! Word-window chunking.
//!
//! Text is split on whitespace and cut into windows of `chunk_size` words,
//! each starting `chunk_size - overlap` words after the previous one.

use serde::{Deserialize, Serialize};

use crate::core::config::ChunkingConfig;
use crate::core::errors::RagError;

/// A slice of source text prepared for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Document name or page URL the text came from.
    pub source_id: String,
    /// Word index of the window start within the source.
    pub offset: usize,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Label used in logs and embedding errors, e.g. `manual.pdf#400`.
    pub fn label(&self) -> String {
        format!("{}#{}", self.source_id, self.offset)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_size ({}) must be greater than overlap ({})",
                chunk_size, overlap
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, RagError> {
        Self::new(config.chunk_size, config.overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Splits `text` into overlapping word windows tagged with `source_id`.
    ///
    /// Empty text or an empty source id yields no chunks.
    pub fn chunk(&self, text: &str, source_id: &str) -> Vec<Chunk> {
        if text.is_empty() {
            tracing::debug!("No text to chunk for '{}'", source_id);
            return Vec::new();
        }
        if source_id.is_empty() {
            tracing::debug!("Refusing to chunk text without a source id");
            return Vec::new();
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let mut chunks = Vec::with_capacity(words.len() / self.step() + 1);
        let mut start = 0;

        while start < words.len() {
            let end = (start + self.chunk_size).min(words.len());
            chunks.push(Chunk {
                text: words[start..end].join(" "),
                source_id: source_id.to_string(),
                offset: start,
                embedding: None,
            });
            start += self.step();
        }

        chunks
    }
}

/// Convenience wrapper over [`Chunker`] for one-off calls.
pub fn chunk_text(
    text: &str,
    source_id: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, RagError> {
    Ok(Chunker::new(chunk_size, overlap)?.chunk(text, source_id))
}

/// Rebuilds the word sequence of one source from its chunks.
///
/// Chunks are ordered by offset and each contributes only the words past
/// the furthest index already covered.
pub fn reassemble(chunks: &[Chunk]) -> Vec<String> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.offset);

    let mut words = Vec::new();
    let mut covered = 0;
    for chunk in ordered {
        let mut end = chunk.offset;
        for (i, word) in chunk.text.split_whitespace().enumerate() {
            let index = chunk.offset + i;
            if index >= covered {
                words.push(word.to_string());
            }
            end = index + 1;
        }
        covered = covered.max(end);
    }
    words
}
