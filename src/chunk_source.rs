//! Chunk Source (C5): turns one document into an ordered sequence of
//! `(chunk_id, text, page?)` triples, either from the upstream segment table
//! or from an in-process PDF parser (spec §4.1 step 3a-c).

use async_trait::async_trait;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct SourceChunk {
    pub chunk_id: String,
    pub text: String,
    pub page: Option<u32>,
}

/// A pre-fetched upstream segment: `(index, text)`. Fetching segments from
/// the upstream system of record is out of scope (spec Non-goals); callers
/// supply them already retrieved.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub text: String,
}

#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Produces chunks in document order, already id-stamped per the
    /// `"<doc_id>_<source>_<index>"` scheme (spec §4.1 step 3b).
    async fn chunks(&self, document_id: &str) -> AppResult<Vec<SourceChunk>>;
}

/// Adapter over the upstream document-segment table (spec §4.1 "the upstream
/// segment adapter"). The table itself is out of scope; this wraps segments
/// the caller has already fetched.
pub struct SegmentChunkSource {
    segments: Vec<Segment>,
}

impl SegmentChunkSource {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

#[async_trait]
impl ChunkSource for SegmentChunkSource {
    async fn chunks(&self, document_id: &str) -> AppResult<Vec<SourceChunk>> {
        Ok(self
            .segments
            .iter()
            .map(|s| SourceChunk {
                chunk_id: format!("{document_id}_seg_{}", s.index),
                text: s.text.clone(),
                page: None,
            })
            .collect())
    }
}

/// High-fidelity parser for PDFs (spec §4.1 step 3a "the high-fidelity
/// parser if enabled AND D is a PDF"), grounded on the corpus's heading/table
/// aware chunker: accumulate lines until `chunk_size`, break at a heading or
/// paragraph boundary, and distribute page numbers over the cumulative text
/// length of each page.
pub struct PdfChunkSource {
    pdf_bytes: Vec<u8>,
    chunk_size: usize,
}

impl PdfChunkSource {
    pub fn new(pdf_bytes: Vec<u8>, chunk_size: usize) -> Self {
        Self { pdf_bytes, chunk_size: chunk_size.max(1) }
    }
}

#[async_trait]
impl ChunkSource for PdfChunkSource {
    async fn chunks(&self, document_id: &str) -> AppResult<Vec<SourceChunk>> {
        // pdf-extract's page-aware entry point only takes a path, so the
        // in-memory buffer is spooled to a scratch file first (mirrors the
        // corpus's own download-to-tempfile-then-parse flow).
        let scratch = std::env::temp_dir().join(format!("{}-{}.pdf", document_id, uuid::Uuid::new_v4()));
        std::fs::write(&scratch, &self.pdf_bytes)
            .map_err(|e| AppError::upstream_permanent("pdf-extract", e))?;

        let pages = pdf_extract::extract_text_by_pages(&scratch).map_err(|e| AppError::upstream_permanent("pdf-extract", e));
        let _ = std::fs::remove_file(&scratch);
        let pages = pages?;

        let texts: Vec<(u32, String)> = split_into_chunks(&pages, self.chunk_size);

        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(idx, (page, text))| SourceChunk {
                chunk_id: format!("{document_id}_docling_{idx}"),
                text,
                page: Some(page),
            })
            .collect())
    }
}

/// Splits page texts into `chunk_size`-ish pieces, breaking at a paragraph
/// boundary when one falls reasonably close to the target, else at a
/// sentence boundary, else at the raw size (ported shape from the corpus's
/// `_find_break_point`).
fn split_into_chunks(pages: &[String], chunk_size: usize) -> Vec<(u32, String)> {
    let mut out = Vec::new();
    for (page_idx, page_text) in pages.iter().enumerate() {
        let page_number = (page_idx + 1) as u32;
        let mut remaining = page_text.as_str();
        while !remaining.trim().is_empty() {
            if remaining.len() <= chunk_size {
                out.push((page_number, remaining.trim().to_string()));
                break;
            }
            let break_point = find_break_point(remaining, chunk_size);
            let (head, tail) = remaining.split_at(break_point);
            let trimmed = head.trim();
            if !trimmed.is_empty() {
                out.push((page_number, trimmed.to_string()));
            }
            remaining = tail;
        }
    }
    out
}

fn find_break_point(text: &str, target_size: usize) -> usize {
    if text.len() <= target_size {
        return text.len();
    }
    let window_end = (target_size + 200).min(text.len());
    if let Some(pos) = text[..window_end].rfind("\n\n") {
        if pos as f64 > target_size as f64 * 0.7 {
            return pos + 2;
        }
    }
    for sep in [". ", ".\n", "\n"] {
        let window_end = (target_size + 100).min(text.len());
        if let Some(pos) = text[..window_end].rfind(sep) {
            if pos as f64 > target_size as f64 * 0.7 {
                return pos + sep.len();
            }
        }
    }
    target_size.min(text.len())
}

/// Re-derives `source_page` for a document's chunks without re-extracting
/// entities (spec §4.1 `update_page_mapping`): recomputes the same page
/// distribution used during ingestion so callers can backfill a page map
/// the first pass skipped.
pub fn recompute_page_map(pages: &[String], chunk_size: usize) -> Vec<Option<u32>> {
    split_into_chunks(pages, chunk_size).into_iter().map(|(page, _)| Some(page)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn segment_source_assigns_stable_seg_ids() {
        let src = SegmentChunkSource::new(vec![
            Segment { index: 0, text: "first".into() },
            Segment { index: 1, text: "second".into() },
        ]);
        let chunks = src.chunks("doc1").await.unwrap();
        assert_eq!(chunks[0].chunk_id, "doc1_seg_0");
        assert_eq!(chunks[1].chunk_id, "doc1_seg_1");
        assert!(chunks.iter().all(|c| c.page.is_none()));
    }

    #[test]
    fn split_into_chunks_breaks_long_page_at_paragraph() {
        let page = "A".repeat(50) + "\n\n" + &"B".repeat(50);
        let chunks = split_into_chunks(&[page], 40);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|(p, _)| *p == 1));
    }

    #[test]
    fn split_into_chunks_keeps_short_page_whole() {
        let chunks = split_into_chunks(&["short text".to_string()], 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1, "short text");
    }
}
