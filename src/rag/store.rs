//! Similarity store abstraction shared by the SQLite and pgvector backends.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::config::DistanceMetric;
use crate::core::errors::RagError;
use crate::rag::chunker::Chunk;

/// One row written to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub text: String,
    pub source_id: String,
    pub embedding: Vec<f32>,
}

impl StoredRecord {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            embedding,
        }
    }

    /// Builds a record from an embedded chunk; `None` when the chunk was never embedded.
    pub fn from_chunk(chunk: Chunk) -> Option<Self> {
        let embedding = chunk.embedding?;
        Some(Self {
            text: chunk.text,
            source_id: chunk.source_id,
            embedding,
        })
    }

    /// Deterministic identity of `(source_id, text)`.
    ///
    /// Re-ingesting the same passage from the same source replaces the
    /// existing row instead of adding a duplicate.
    pub fn record_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A retrieved record with its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub text: String,
    pub source_id: String,
    /// Smaller is closer.
    pub distance: f32,
}

#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// Backend name for logs, e.g. `sqlite`.
    fn name(&self) -> &'static str;

    /// Vector dimension fixed for this collection.
    fn dimension(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    /// Creates the collection if missing and checks its dimension.
    async fn prepare(&self) -> Result<(), RagError>;

    /// Writes all records in one transaction and returns how many rows were
    /// written; records repeating a `record_key` within the batch count once.
    ///
    /// Either every record lands or none do.
    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize, RagError>;

    /// Up to `k` records ordered closest first; ties keep insertion order.
    async fn query_top_k(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError>;

    async fn count(&self) -> Result<usize, RagError>;

    /// Removes every record, returning how many were deleted.
    async fn clear(&self) -> Result<usize, RagError>;
}

/// Rejects a batch when any embedding has the wrong length.
pub fn check_dimensions(records: &[StoredRecord], expected: usize) -> Result<(), RagError> {
    match records.iter().find(|record| record.embedding.len() != expected) {
        Some(record) => Err(RagError::DimensionMismatch {
            expected,
            actual: record.embedding.len(),
        }),
        None => Ok(()),
    }
}

/// Collapses records sharing a `record_key`, keeping the last one in the
/// position of the first.
pub fn dedupe_by_key(records: Vec<StoredRecord>) -> Vec<StoredRecord> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<StoredRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.entry(record.record_key()) {
            Entry::Occupied(slot) => unique[*slot.get()] = record,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

/// Validates query arguments; `Ok(false)` means the result is trivially empty.
pub fn check_query(query: &[f32], k: usize, expected: usize) -> Result<bool, RagError> {
    if k == 0 {
        return Err(RagError::Configuration(
            "k must be at least 1".to_string(),
        ));
    }
    if query.is_empty() {
        return Ok(false);
    }
    if query.len() != expected {
        return Err(RagError::DimensionMismatch {
            expected,
            actual: query.len(),
        });
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_depends_on_source_and_text() {
        let a = StoredRecord::new("same text", "a.pdf", vec![0.1]);
        let b = StoredRecord::new("same text", "a.pdf", vec![0.9]);
        let c = StoredRecord::new("same text", "b.pdf", vec![0.1]);

        assert_eq!(a.record_key(), b.record_key());
        assert_ne!(a.record_key(), c.record_key());
        assert_eq!(a.record_key().len(), 64);
    }

    #[test]
    fn record_key_separates_source_from_text() {
        let a = StoredRecord::new("bc", "a", vec![]);
        let b = StoredRecord::new("c", "ab", vec![]);
        assert_ne!(a.record_key(), b.record_key());
    }

    #[test]
    fn unembedded_chunks_do_not_become_records() {
        let chunk = Chunk {
            text: "hello".to_string(),
            source_id: "doc".to_string(),
            offset: 0,
            embedding: None,
        };
        assert!(StoredRecord::from_chunk(chunk.clone()).is_none());

        let record = StoredRecord::from_chunk(chunk.with_embedding(vec![1.0, 2.0])).unwrap();
        assert_eq!(record.embedding, vec![1.0, 2.0]);
        assert_eq!(record.source_id, "doc");
    }

    #[test]
    fn dimension_check_reports_first_offender() {
        let records = vec![
            StoredRecord::new("a", "s", vec![0.0; 3]),
            StoredRecord::new("b", "s", vec![0.0; 2]),
        ];
        let err = check_dimensions(&records, 3).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn repeated_keys_collapse_to_the_last_record() {
        let records = vec![
            StoredRecord::new("same", "d", vec![1.0, 0.0]),
            StoredRecord::new("other", "d", vec![0.5, 0.5]),
            StoredRecord::new("same", "d", vec![0.0, 1.0]),
        ];
        let unique = dedupe_by_key(records);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].text, "same");
        assert_eq!(unique[0].embedding, vec![0.0, 1.0]);
        assert_eq!(unique[1].text, "other");
    }

    #[test]
    fn query_checks() {
        assert!(matches!(check_query(&[1.0], 0, 1), Err(RagError::Configuration(_))));
        assert!(!check_query(&[], 3, 4).unwrap());
        assert!(check_query(&[1.0, 2.0], 3, 2).unwrap());
        assert!(check_query(&[1.0], 3, 2).is_err());
    }
}
