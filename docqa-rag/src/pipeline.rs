//! Document ingestion: load → chunk → embed → index.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{RagConfig, pipeline};
//!
//! let config = RagConfig::default();
//! let index =
//!     pipeline::ingest_pdf("data/paper.pdf", "db/default", &config, embedder.as_ref()).await?;
//! ```

use std::path::Path;

use tracing::{info, warn};

use crate::chunking::{Chunker, SectionChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::loader::load_pdf;

/// Load a PDF and split it into chunks.
///
/// The document id is the file stem. Returns an empty `Vec` when every page
/// was filtered out or the document has no text.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfiguration`] before touching the file unless
/// `chunk_overlap < chunk_size`, and [`RagError::UnsupportedFormat`] when the
/// file is not a readable PDF.
pub async fn chunk_document(
    path: impl AsRef<Path>,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>> {
    let chunker = SectionChunker::new(chunk_size, chunk_overlap)?;
    let path = path.as_ref();
    let pages = load_pdf(path).await?;
    let document_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    Ok(chunker.chunk(&Document::new(document_id, pages)))
}

/// Load, chunk, and index a PDF at `persist_dir`.
///
/// If `persist_dir` already holds an index, it is returned as-is.
///
/// # Errors
///
/// Returns [`RagError::EmptyContent`] when the document yields no chunks, in
/// which case nothing is written.
pub async fn ingest_pdf(
    path: impl AsRef<Path>,
    persist_dir: impl AsRef<Path>,
    config: &RagConfig,
    embedder: &dyn EmbeddingProvider,
) -> Result<VectorIndex> {
    let path = path.as_ref();
    let persist_dir = persist_dir.as_ref();
    if VectorIndex::is_built(persist_dir).await {
        return VectorIndex::load_or_create(None, persist_dir, embedder).await;
    }

    let chunks = chunk_document(path, config.chunk_size, config.chunk_overlap).await?;
    ingest_chunks(chunks, persist_dir, embedder).await.inspect_err(|e| {
        warn!(document = %path.display(), error = %e, "ingestion failed");
    })
}

/// Index already-chunked content, rejecting an empty chunk set.
pub async fn ingest_chunks(
    chunks: Vec<Chunk>,
    persist_dir: impl AsRef<Path>,
    embedder: &dyn EmbeddingProvider,
) -> Result<VectorIndex> {
    if chunks.is_empty() {
        return Err(RagError::EmptyContent("PDF has no valid content to embed.".to_string()));
    }
    let chunk_count = chunks.len();
    let index = VectorIndex::load_or_create(Some(chunks), persist_dir, embedder).await?;
    info!(chunk_count, location = %index.location().display(), "ingested document");
    Ok(index)
}
