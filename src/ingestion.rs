//! Ingestion Pipeline (C6, spec §4.1): runs a per-dataset build job in the
//! background, tracking progress, and supporting resume via C1's processed-
//! chunk markers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::chunk_source::{ChunkSource, PdfChunkSource, Segment, SegmentChunkSource, SourceChunk};
use crate::error::{AppError, AppResult};
use crate::extractor::extract_chunk;
use crate::graph_store::GraphStore;
use crate::llm::LlmManager;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Idle,
    Building,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildProgress {
    pub status: BuildStatus,
    pub total_documents: usize,
    pub completed_documents: usize,
    pub total_segments: usize,
    pub completed_segments: usize,
    pub skipped_segments: usize,
    pub current_document: Option<String>,
    pub entities_extracted: usize,
    pub relationships_extracted: usize,
    pub error: Option<String>,
    pub resume_mode: bool,
    pub hi_fidelity_mode: bool,
}

impl Default for BuildProgress {
    fn default() -> Self {
        Self {
            status: BuildStatus::Idle,
            total_documents: 0,
            completed_documents: 0,
            total_segments: 0,
            completed_segments: 0,
            skipped_segments: 0,
            current_document: None,
            entities_extracted: 0,
            relationships_extracted: 0,
            error: None,
            resume_mode: false,
            hi_fidelity_mode: false,
        }
    }
}

/// One document to ingest, carrying whichever chunk-source material the
/// caller already fetched from the upstream platform (spec §4.1 step 2: the
/// upstream DB adapter is out of scope, so the API layer supplies documents
/// already enumerated and, for PDFs, already downloaded).
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub document_id: String,
    pub is_pdf: bool,
    pub pdf_bytes: Option<Vec<u8>>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub chunk_size: usize,
    pub resume: bool,
    pub use_high_fidelity_parser: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { chunk_size: 1200, resume: true, use_high_fidelity_parser: false }
    }
}

#[derive(Clone)]
pub struct IngestionEngine {
    graph_store: GraphStore,
    vector_store: VectorStore,
    llm: LlmManager,
    registry: Arc<dashmap::DashMap<String, Arc<Mutex<BuildProgress>>>>,
}

impl IngestionEngine {
    pub fn new(graph_store: GraphStore, vector_store: VectorStore, llm: LlmManager) -> Self {
        Self { graph_store, vector_store, llm, registry: Arc::new(dashmap::DashMap::new()) }
    }

    /// Starts a build for `dataset_id` in the background (spec §4.1
    /// `start`). Fails with `Conflict` if a build for the same dataset is
    /// already `building` (single-writer discipline per dataset_id).
    pub async fn start(&self, dataset_id: String, documents: Vec<DocumentRef>, options: BuildOptions) -> AppResult<()> {
        if let Some(existing) = self.registry.get(&dataset_id) {
            let guard = existing.lock().await;
            if guard.status == BuildStatus::Building {
                return Err(AppError::Conflict(format!("build already running for dataset {dataset_id}")));
            }
        }

        let progress = Arc::new(Mutex::new(BuildProgress {
            status: BuildStatus::Building,
            total_documents: documents.len(),
            resume_mode: options.resume,
            hi_fidelity_mode: options.use_high_fidelity_parser,
            ..Default::default()
        }));
        self.registry.insert(dataset_id.clone(), progress.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_build(&dataset_id, documents, options, progress.clone()).await {
                error!(dataset_id = %dataset_id, error = %e, "ingestion build failed");
                let mut p = progress.lock().await;
                p.status = BuildStatus::Error;
                p.error = Some(e.to_string());
            }
        });

        Ok(())
    }

    pub async fn get_progress(&self, dataset_id: &str) -> Option<BuildProgress> {
        match self.registry.get(dataset_id) {
            Some(entry) => Some(entry.lock().await.clone()),
            None => None,
        }
    }

    /// Drops the in-memory record (spec §4.1 `clear_progress`); refuses on
    /// an active build.
    pub async fn clear_progress(&self, dataset_id: &str) -> AppResult<()> {
        if let Some(entry) = self.registry.get(dataset_id) {
            let guard = entry.lock().await;
            if guard.status == BuildStatus::Building {
                return Err(AppError::Conflict(format!("build still running for dataset {dataset_id}")));
            }
        }
        self.registry.remove(dataset_id);
        Ok(())
    }

    /// Re-derives `source_page` for a document's already-extracted entities
    /// from a fresh page-text array, without re-running extraction (spec
    /// §4.1 `update_page_mapping`).
    pub async fn update_page_mapping(&self, dataset_id: &str, document_id: &str, pages: &[String], chunk_size: usize) -> AppResult<usize> {
        let page_map = crate::chunk_source::recompute_page_map(pages, chunk_size);
        let mut updated = 0;
        for (idx, page) in page_map.into_iter().enumerate() {
            let Some(page) = page else { continue };
            let chunk_id = format!("{document_id}_docling_{idx}");
            if self.graph_store.update_entity_source_page(dataset_id, &chunk_id, page).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn run_build(
        &self,
        dataset_id: &str,
        documents: Vec<DocumentRef>,
        options: BuildOptions,
        progress: Arc<Mutex<BuildProgress>>,
    ) -> AppResult<()> {
        let done = if options.resume {
            self.graph_store.processed_chunk_markers(dataset_id).await?
        } else {
            Default::default()
        };

        for document in documents {
            {
                let mut p = progress.lock().await;
                p.current_document = Some(document.document_id.clone());
            }

            if let Err(e) = self.ingest_document(dataset_id, &document, &options, &done, &progress).await {
                warn!(dataset_id, document_id = %document.document_id, error = %e, "document ingestion failed, continuing with next document");
            }

            let mut p = progress.lock().await;
            p.completed_documents += 1;
        }

        let mut p = progress.lock().await;
        p.status = BuildStatus::Completed;
        p.current_document = None;
        Ok(())
    }

    async fn ingest_document(
        &self,
        dataset_id: &str,
        document: &DocumentRef,
        options: &BuildOptions,
        done: &std::collections::HashSet<String>,
        progress: &Arc<Mutex<BuildProgress>>,
    ) -> AppResult<()> {
        let chunks = self.select_chunks(document, options).await?;

        {
            let mut p = progress.lock().await;
            p.total_segments += chunks.len();
        }

        for chunk in chunks {
            if done.contains(&chunk.chunk_id) {
                let mut p = progress.lock().await;
                p.skipped_segments += 1;
                p.completed_segments += 1;
                continue;
            }

            self.ingest_chunk(dataset_id, document, &chunk, options.chunk_size, progress).await;
            self.graph_store.mark_chunk_processed(dataset_id, &chunk.chunk_id).await?;

            {
                let mut p = progress.lock().await;
                p.completed_segments += 1;
            }

            // Cooperative pacing (spec §4.1 step 3f): yield between chunks
            // so a build doesn't starve other work on the runtime.
            sleep(Duration::from_millis(50)).await;
        }

        Ok(())
    }

    async fn select_chunks(&self, document: &DocumentRef, options: &BuildOptions) -> AppResult<Vec<SourceChunk>> {
        if options.use_high_fidelity_parser && document.is_pdf {
            if let Some(bytes) = &document.pdf_bytes {
                let source = PdfChunkSource::new(bytes.clone(), options.chunk_size);
                match source.chunks(&document.document_id).await {
                    Ok(chunks) => return Ok(chunks),
                    Err(e) => warn!(document_id = %document.document_id, error = %e, "high-fidelity parse failed, falling back to segments"),
                }
            }
        }
        let source = SegmentChunkSource::new(document.segments.clone());
        source.chunks(&document.document_id).await
    }

    /// Per-chunk extraction failures are logged and the chunk is still
    /// marked done (spec §4.1 failure semantics); only the outer document
    /// loop sees a hard error.
    async fn ingest_chunk(&self, dataset_id: &str, document: &DocumentRef, chunk: &SourceChunk, chunk_size: usize, progress: &Arc<Mutex<BuildProgress>>) {
        let truncated: String = chunk.text.chars().take(chunk_size).collect();

        let extraction = match extract_chunk(&self.llm, dataset_id, &truncated).await {
            Ok(o) => o,
            Err(e) => {
                warn!(dataset_id, chunk_id = %chunk.chunk_id, error = %e, "chunk extraction failed, counted as processed");
                return;
            }
        };

        let mut entities = extraction.entities;
        for e in entities.iter_mut() {
            e.source_document_id = Some(document.document_id.clone());
            e.source_chunk_id = Some(chunk.chunk_id.clone());
            e.source_page = chunk.page;
        }

        if let Err(e) = self.graph_store.upsert_entities(&entities, dataset_id).await {
            warn!(dataset_id, chunk_id = %chunk.chunk_id, error = %e, "failed to write entities");
            return;
        }

        if let Err(e) = self.vector_store.insert_batch(&entities, &self.llm).await {
            warn!(dataset_id, chunk_id = %chunk.chunk_id, error = %e, "failed to write embeddings");
        }

        let name_by_id: HashMap<&str, &str> = entities.iter().map(|e| (e.id.as_str(), e.name.as_str())).collect();
        let mut relationships = extraction.relationships;
        for r in relationships.iter_mut() {
            r.source_document_id = Some(document.document_id.clone());
        }
        let named: Vec<(crate::models::Relationship, String, String)> = relationships
            .into_iter()
            .filter_map(|r| {
                let source_name = name_by_id.get(r.source_entity_id.as_str())?.to_string();
                let target_name = name_by_id.get(r.target_entity_id.as_str())?.to_string();
                Some((r, source_name, target_name))
            })
            .collect();

        let rel_written = match self.graph_store.upsert_relationships(&named, dataset_id).await {
            Ok(report) => report.written,
            Err(e) => {
                warn!(dataset_id, chunk_id = %chunk.chunk_id, error = %e, "failed to write relationships");
                0
            }
        };

        let mut p = progress.lock().await;
        p.entities_extracted += entities.len();
        p.relationships_extracted += rel_written;
        info!(dataset_id, chunk_id = %chunk.chunk_id, entities = entities.len(), relationships = rel_written, "chunk ingested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_progress_defaults_to_idle() {
        let p = BuildProgress::default();
        assert_eq!(p.status, BuildStatus::Idle);
        assert_eq!(p.completed_segments, 0);
    }
}
