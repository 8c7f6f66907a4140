//! Embedding provider for OpenAI-compatible `/v1/embeddings` endpoints.
//!
//! Works against the hosted OpenAI API as well as self-hosted servers that
//! speak the same protocol (text-embeddings-inference, vLLM, Ollama), which is
//! how sentence-transformer models such as `all-MiniLM-L6-v2` are usually
//! served.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{EmbeddingProvider, check_dimensions};
use crate::error::{RagError, Result};

/// The default OpenAI embeddings API endpoint.
pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

const PROVIDER: &str = "OpenAI-compatible";

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// # Configuration
///
/// - `endpoint` – full URL of the embeddings route.
/// - `model` – model name sent with each request and recorded in index manifests.
/// - `dimensions` – expected vector length; responses of any other length are rejected.
/// - `api_key` – optional bearer token.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::openai::OpenAIEmbeddingProvider;
///
/// let endpoint = "http://localhost:8081/v1/embeddings";
/// let provider = OpenAIEmbeddingProvider::new(endpoint, "all-MiniLM-L6-v2", 384)?
///     .with_api_key("sk-...");
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbeddingProvider {
    /// Create a new provider for the given endpoint and model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] if the endpoint or model is empty, or
    /// `dimensions` is zero.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let model = model.into();
        if endpoint.trim().is_empty() || model.trim().is_empty() {
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: "endpoint and model must not be empty".into(),
            });
        }
        if dimensions == 0 {
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: "dimensions must be greater than zero".into(),
            });
        }

        Ok(Self { client: reqwest::Client::new(), endpoint, api_key: None, model, dimensions })
    }

    /// Set the bearer token sent with each request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::Embedding {
            provider: PROVIDER.into(),
            message: "API returned empty response".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest { model: &self.model, input: texts.to_vec() };

        let mut request = self.client.post(&self.endpoint).json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "request failed");
            RagError::Embedding {
                provider: PROVIDER.into(),
                message: format!("request failed: {e}"),
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: format!("API returned {status}: {detail}"),
            });
        }

        let mut embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            RagError::Embedding {
                provider: PROVIDER.into(),
                message: format!("failed to parse response: {e}"),
            }
        })?;

        if embedding_response.data.len() != texts.len() {
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    embedding_response.data.len()
                ),
            });
        }

        // Servers may return items out of order; `index` restores request order.
        embedding_response.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        let embeddings: Vec<Vec<f32>> =
            embedding_response.data.into_iter().map(|d| d.embedding).collect();
        for embedding in &embeddings {
            check_dimensions(PROVIDER, self.dimensions, embedding)?;
        }

        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
