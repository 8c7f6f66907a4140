//! Deterministic offline embeddings.
//!
//! [`HashingEmbeddingProvider`] hashes lowercase word tokens into a fixed
//! number of buckets and L2-normalises the counts. It needs no model or
//! network access, so it backs tests and air-gapped deployments. Identical
//! texts always produce identical vectors.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// Model identifier prefix recorded in index manifests.
const MODEL_PREFIX: &str = "feature-hashing";

/// Bag-of-words feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing vectors with `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self { dimensions, model_id: format!("{MODEL_PREFIX}-{dimensions}") }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            // The top bit picks the sign so unrelated tokens cancel rather than pile up.
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            embedding.iter_mut().for_each(|x| *x /= norm);
        }
        embedding
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
        (acc ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_gives_identical_vectors() {
        let provider = HashingEmbeddingProvider::new(64);
        let a = provider.embed("Beam search decoding").await.unwrap();
        let b = provider.embed("beam SEARCH decoding").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn vectors_are_normalised() {
        let provider = HashingEmbeddingProvider::new(32);
        let v = provider.embed("retrieval augmented generation").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let provider = HashingEmbeddingProvider::new(8);
        assert!(provider.embed("  ").await.unwrap().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn model_id_encodes_dimensions() {
        assert_eq!(HashingEmbeddingProvider::new(16).model_id(), "feature-hashing-16");
    }
}
