//! Text embedding backends.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// Turns text into fixed-length vectors for similarity search.
///
/// Chunks and queries must be embedded by the same model, so every provider
/// reports a [`model_id`](EmbeddingProvider::model_id). [`VectorIndex`]
/// records it at build time and refuses providers reporting anything else.
///
/// [`VectorIndex`]: crate::index::VectorIndex
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    ///
    /// Falls back to one [`embed`](EmbeddingProvider::embed) call per text;
    /// remote backends override it with a single request.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Identifier of the underlying model, stored in index manifests.
    fn model_id(&self) -> &str;
}

/// Reject a vector whose length differs from `expected`.
pub(crate) fn check_dimensions(provider: &str, expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() == expected {
        return Ok(());
    }
    Err(RagError::Embedding {
        provider: provider.to_string(),
        message: format!("expected {expected} dimensions, got {}", vector.len()),
    })
}
