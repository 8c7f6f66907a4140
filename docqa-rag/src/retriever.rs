//! Read-only query interface over a vector index.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{MetadataFilter, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::VectorIndex;

/// Finds the chunks most relevant to a natural-language query.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return at most `top_k` results ordered by descending similarity.
    ///
    /// A present-but-empty `filter` fails with
    /// [`RagError::InvalidFilter`](crate::RagError::InvalidFilter); `None`
    /// searches every chunk.
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>>;
}

/// A [`Retriever`] that embeds the query with the same model that built the index.
#[derive(Clone)]
pub struct IndexRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexRetriever {
    /// Bind an index to the embedder used to query it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingMismatch`](crate::RagError::EmbeddingMismatch)
    /// if the embedder is not the model the index was built with.
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        index.ensure_compatible(embedder.as_ref())?;
        Ok(Self { index, embedder })
    }

    /// The underlying index.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }
}

impl std::fmt::Debug for IndexRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRetriever")
            .field("location", &self.index.location())
            .field("embedding_model", &self.embedder.model_id())
            .finish()
    }
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let embedding = self.embedder.embed(query).await?;
        let results = self.index.search(&embedding, top_k, filter)?;
        debug!(
            top_k,
            result_count = results.len(),
            filtered = filter.is_some(),
            "retrieved chunks"
        );
        Ok(results)
    }
}
