//! Document ingestion: extract, chunk, embed, store.
//!
//! One bad chunk or document never aborts a run; it is counted in the
//! report and the rest carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::chunker::{Chunk, Chunker};
use super::store::{SimilarityStore, StoredRecord};
use crate::core::errors::RagError;
use crate::llm::Embedder;
use crate::sources::{list_documents, DocumentExtractor, SitemapClient};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks_embedded: usize,
    pub chunks_skipped: usize,
    pub records_stored: usize,
    pub failures: Vec<String>,
}

impl IngestReport {
    pub fn absorb(&mut self, other: IngestReport) {
        self.documents += other.documents;
        self.chunks_embedded += other.chunks_embedded;
        self.chunks_skipped += other.chunks_skipped;
        self.records_stored += other.records_stored;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct IngestionPipeline {
    chunker: Chunker,
    embedder: Arc<Embedder>,
    store: Arc<dyn SimilarityStore>,
    extractor: Arc<dyn DocumentExtractor>,
}

impl IngestionPipeline {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<Embedder>,
        store: Arc<dyn SimilarityStore>,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            extractor,
        }
    }

    /// Chunks, embeds and stores one document's text under `source_id`.
    ///
    /// Chunks that fail to embed are skipped. Store failures are returned,
    /// and nothing from this document is written in that case.
    pub async fn ingest_text(&self, text: &str, source_id: &str) -> Result<IngestReport, RagError> {
        let mut report = IngestReport {
            documents: 1,
            ..IngestReport::default()
        };

        let chunks = self.chunker.chunk(text, source_id);
        if chunks.is_empty() {
            tracing::info!("'{}' produced no chunks", source_id);
            return Ok(report);
        }

        let embedded = self.embed_chunks(chunks, &mut report).await;
        report.chunks_embedded = embedded.len();

        let records: Vec<StoredRecord> = embedded
            .into_iter()
            .filter_map(StoredRecord::from_chunk)
            .collect();
        report.records_stored = self.store.upsert(records).await?;

        tracing::info!(
            "Ingested '{}': {} chunks stored, {} skipped",
            source_id,
            report.records_stored,
            report.chunks_skipped
        );
        Ok(report)
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>, report: &mut IngestReport) -> Vec<Chunk> {
        if self.embedder.supports_batch() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    return chunks
                        .into_iter()
                        .zip(vectors)
                        .map(|(chunk, vector)| chunk.with_embedding(vector))
                        .collect();
                }
                Err(err) => {
                    tracing::warn!("Batch embedding failed, retrying chunk by chunk: {}", err);
                }
            }
        }

        let mut embedded = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let label = chunk.label();
            match self.embedder.embed_item(&label, &chunk.text).await {
                Ok(vector) => embedded.push(chunk.with_embedding(vector)),
                Err(err) => {
                    tracing::warn!("Skipping chunk {}: {}", label, err);
                    report.chunks_skipped += 1;
                    report.failures.push(err.to_string());
                }
            }
        }
        embedded
    }

    /// Ingests a file path or URL. Extraction failures count as an empty document.
    pub async fn ingest_document(&self, location: &str) -> IngestReport {
        let document = match self.extractor.extract(location).await {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!("Could not extract text from {}: {}", location, err);
                return IngestReport {
                    documents: 1,
                    failures: vec![format!("{}: {}", location, err)],
                    ..IngestReport::default()
                };
            }
        };

        match self.ingest_text(&document.text, &document.name).await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!("Storing '{}' failed: {}", document.name, err);
                IngestReport {
                    documents: 1,
                    failures: vec![format!("{}: {}", document.name, err)],
                    ..IngestReport::default()
                }
            }
        }
    }

    pub async fn ingest_files(&self, paths: &[PathBuf]) -> IngestReport {
        let mut report = IngestReport::default();
        for path in paths {
            report.absorb(self.ingest_document(&path.to_string_lossy()).await);
        }
        report
    }

    /// Ingests every matching file directly inside `dir`.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        extensions: &[String],
    ) -> Result<IngestReport, RagError> {
        let paths = list_documents(dir, extensions)?;
        tracing::info!("Found {} documents in {}", paths.len(), dir.display());
        Ok(self.ingest_files(&paths).await)
    }

    pub async fn ingest_url(&self, url: &str) -> IngestReport {
        self.ingest_document(url).await
    }

    /// Ingests every page the site's sitemap lists, or the base page alone
    /// when the sitemap cannot be read.
    pub async fn ingest_site(
        &self,
        base_url: &str,
        sitemap: &SitemapClient,
    ) -> Result<IngestReport, RagError> {
        let urls = match sitemap.list_urls(base_url).await {
            Ok(urls) => urls,
            Err(err @ RagError::Configuration(_)) => return Err(err),
            Err(err) => {
                tracing::warn!("Sitemap lookup for {} failed: {}", base_url, err);
                vec![base_url.trim_end_matches('/').to_string()]
            }
        };

        let mut report = IngestReport::default();
        for url in urls {
            report.absorb(self.ingest_url(&url).await);
        }
        Ok(report)
    }
}
