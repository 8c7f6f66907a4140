//! Persistent vector index.
//!
//! A [`VectorIndex`] lives in its own directory:
//!
//! - `entries.json`: every chunk with its embedding, in insertion order
//! - `manifest.json`: format version, embedding model, dimensions, chunk count
//!
//! The manifest is written last, so a directory holds a built index exactly
//! when its manifest exists. Anything else in the directory is treated as an
//! interrupted build and overwritten by the next build. Search is exact cosine
//! similarity over all entries; the index is never mutated after it is built.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::document::{Chunk, MetadataFilter, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// File holding the index metadata. Its presence marks a completed build.
pub const MANIFEST_FILE: &str = "manifest.json";

/// File holding the chunks and their embeddings.
pub const ENTRIES_FILE: &str = "entries.json";

const FORMAT_VERSION: u32 = 1;

/// Metadata recorded alongside a built index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// On-disk format version.
    pub format_version: u32,
    /// Identifier of the embedding model used to build the index.
    pub embedding_model: String,
    /// Length of every stored embedding.
    pub dimensions: usize,
    /// Number of indexed chunks.
    pub chunk_count: usize,
    /// When the build completed.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// A fully built, read-only similarity index over document chunks.
#[derive(Debug)]
pub struct VectorIndex {
    location: PathBuf,
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex {
    /// Whether `location` holds a completed index build.
    pub async fn is_built(location: impl AsRef<Path>) -> bool {
        tokio::fs::try_exists(location.as_ref().join(MANIFEST_FILE)).await.unwrap_or(false)
    }

    /// Load the index at `location` if one is built there, otherwise embed
    /// `chunks` and build a new one.
    ///
    /// When an index already exists, `chunks` is ignored: the first build for a
    /// location wins and nothing is re-embedded.
    ///
    /// # Errors
    ///
    /// - [`RagError::MissingInput`] if no index exists and `chunks` is absent or empty
    /// - [`RagError::EmbeddingMismatch`] if an existing index was built with a
    ///   different embedding model than `embedder`
    pub async fn load_or_create(
        chunks: Option<Vec<Chunk>>,
        location: impl AsRef<Path>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        let location = location.as_ref();
        if Self::is_built(location).await {
            let index = Self::load(location).await?;
            index.ensure_compatible(embedder)?;
            return Ok(index);
        }

        match chunks {
            Some(chunks) if !chunks.is_empty() => Self::create(chunks, location, embedder).await,
            _ => Err(RagError::MissingInput(format!(
                "no index at '{}' and no chunks to build one",
                location.display()
            ))),
        }
    }

    /// Load a previously built index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexUnavailable`] when `location` has no manifest and
    /// [`RagError::Index`] when the files disagree with each other.
    pub async fn load(location: impl AsRef<Path>) -> Result<Self> {
        let location = location.as_ref();
        let manifest_bytes = match tokio::fs::read(location.join(MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::IndexUnavailable(format!(
                    "no index built at '{}'",
                    location.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::Index(format!(
                "unsupported index format version {}",
                manifest.format_version
            )));
        }

        let entries: Vec<IndexEntry> =
            serde_json::from_slice(&tokio::fs::read(location.join(ENTRIES_FILE)).await?)?;
        if entries.len() != manifest.chunk_count {
            return Err(RagError::Index(format!(
                "manifest lists {} chunks but {} are stored",
                manifest.chunk_count,
                entries.len()
            )));
        }

        info!(
            location = %location.display(),
            chunk_count = entries.len(),
            embedding_model = %manifest.embedding_model,
            "loaded vector index"
        );
        Ok(Self { location: location.to_path_buf(), manifest, entries })
    }

    /// Embed `chunks` and write a new index at `location`.
    async fn create(
        chunks: Vec<Chunk>,
        location: &Path,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts).await.map_err(|e| {
            error!(
                location = %location.display(),
                error = %e,
                "embedding failed during index build"
            );
            e
        })?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::Index(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        let dimensions = embedder.dimensions();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimensions) {
            return Err(RagError::Index(format!(
                "embedding has {} dimensions, expected {dimensions}",
                bad.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_model: embedder.model_id().to_string(),
            dimensions,
            chunk_count: entries.len(),
            created_at: Utc::now(),
        };

        tokio::fs::create_dir_all(location).await?;
        write_atomically(&location.join(ENTRIES_FILE), &serde_json::to_vec(&entries)?).await?;
        write_atomically(&location.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?)
            .await?;

        info!(
            location = %location.display(),
            chunk_count = manifest.chunk_count,
            embedding_model = %manifest.embedding_model,
            "built vector index"
        );
        Ok(Self { location: location.to_path_buf(), manifest, entries })
    }

    /// Fail unless `embedder` produced the vectors stored in this index.
    pub fn ensure_compatible(&self, embedder: &dyn EmbeddingProvider) -> Result<()> {
        if embedder.model_id() != self.manifest.embedding_model
            || embedder.dimensions() != self.manifest.dimensions
        {
            return Err(RagError::EmbeddingMismatch {
                index_model: self.manifest.embedding_model.clone(),
                provider_model: embedder.model_id().to_string(),
            });
        }
        Ok(())
    }

    /// Directory holding the index files.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Build metadata.
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexed chunks in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// Return the `top_k` chunks most similar to `embedding`, restricted to
    /// chunks matching `filter` when one is given.
    ///
    /// Results are ordered by descending score; equal scores keep insertion order.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidFilter`] if `filter` is present but empty
    /// - [`RagError::Index`] if `embedding` has the wrong dimensionality
    pub fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        if embedding.len() != self.manifest.dimensions {
            return Err(RagError::Index(format!(
                "query embedding has {} dimensions, index expects {}",
                embedding.len(),
                self.manifest.dimensions
            )));
        }

        let mut scored: Vec<SearchResult> = self
            .entries
            .iter()
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.chunk)))
            .map(|entry| SearchResult {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&entry.embedding, embedding),
            })
            .collect();

        // NaN scores rank last. `sort_by` is stable, which keeps ties in insertion order.
        scored.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
            (false, false) => b.score.total_cmp(&a.score),
            (a_nan, b_nan) => a_nan.cmp(&b_nan),
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let score = cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]);
        assert!((score - 1.0).abs() < 1e-6);
    }
}
