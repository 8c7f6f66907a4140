//! Answer generation behind a fixed decoding policy.
//!
//! [`TextGenerator`] is the seam between the question-answering chain and the
//! text-generation model. [`HttpGenerator`] talks to a Hugging Face
//! inference-style endpoint (`text2text-generation` task) and sends the
//! [`DecodingConfig`] with every request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{RagError, Result};

/// Decoding parameters sent to the generation model.
///
/// Field names match the Hugging Face generation parameters so the struct can
/// be serialized into a request as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodingConfig {
    /// Beam width.
    pub num_beams: usize,
    /// Minimum output length in tokens.
    pub min_length: usize,
    /// Maximum output length in tokens.
    pub max_length: usize,
    /// Size of n-grams that may not repeat in the output.
    pub no_repeat_ngram_size: usize,
    /// Stop beams as soon as every beam reached an end token.
    pub early_stopping: bool,
    /// Truncate over-length input instead of failing.
    pub truncation: bool,
    /// Always `false`: beam search is deterministic.
    pub do_sample: bool,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            num_beams: 4,
            min_length: 40,
            max_length: 512,
            no_repeat_ngram_size: 3,
            early_stopping: true,
            truncation: true,
            do_sample: false,
        }
    }
}

/// A text-generation model.
///
/// Implementations must return [`RagError::GenerationUnavailable`] instead of
/// an empty string when the model cannot answer, and must produce the same
/// output for a prompt whether it is generated alone or inside a batch.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for one prompt.
    ///
    /// Implementations should stop work and return an error once `cancel`
    /// fires; implementations that cannot interrupt the model may finish the
    /// call and have their result discarded.
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String>;

    /// Generate completions for several prompts, in order.
    ///
    /// The default implementation calls [`generate`](TextGenerator::generate)
    /// sequentially.
    async fn generate_batch(
        &self,
        prompts: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut results = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            results.push(self.generate(prompt, cancel).await?);
        }
        Ok(results)
    }

    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;
}

/// A [`TextGenerator`] backed by an HTTP inference endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::generation::{DecodingConfig, HttpGenerator};
///
/// let generator = HttpGenerator::new(
///     "http://localhost:8080/models/google/flan-t5-large",
///     "google/flan-t5-large",
///     DecodingConfig::default(),
/// )?;
/// let answer = generator.generate(&prompt, &CancellationToken::new()).await?;
/// ```
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    decoding: DecodingConfig,
}

impl HttpGenerator {
    /// Create a generator for `model` served at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationUnavailable`] if the endpoint is not an
    /// `http(s)` URL.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        decoding: DecodingConfig,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(RagError::GenerationUnavailable(format!(
                "generation endpoint '{endpoint}' is not an http(s) URL"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            model: model.into(),
            api_key: None,
            decoding,
        })
    }

    /// Set the bearer token sent with each request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    /// The decoding policy sent with every request.
    pub fn decoding(&self) -> &DecodingConfig {
        &self.decoding
    }

    async fn send(&self, prompts: &[&str]) -> Result<Vec<String>> {
        let body = GenerationRequest {
            inputs: prompts,
            parameters: &self.decoding,
            options: RequestOptions { wait_for_model: true, use_cache: true },
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(model = %self.model, error = %e, "generation request failed");
            RagError::GenerationUnavailable(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!(model = %self.model, %status, "generation API error");
            return Err(RagError::GenerationUnavailable(format!(
                "API returned {status}: {detail}"
            )));
        }

        let parsed: GenerationResponse = response.json().await.map_err(|e| {
            RagError::GenerationUnavailable(format!("failed to parse response: {e}"))
        })?;
        let outputs = parsed.into_texts();

        if outputs.len() != prompts.len() {
            return Err(RagError::GenerationUnavailable(format!(
                "expected {} outputs, got {}",
                prompts.len(),
                outputs.len()
            )));
        }
        if outputs.iter().any(|o| o.trim().is_empty()) {
            return Err(RagError::GenerationUnavailable("model returned empty output".into()));
        }
        Ok(outputs)
    }
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    inputs: &'a [&'a str],
    parameters: &'a DecodingConfig,
    options: RequestOptions,
}

#[derive(Serialize)]
struct RequestOptions {
    wait_for_model: bool,
    use_cache: bool,
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// Inference servers disagree on nesting for batched inputs.
#[derive(Deserialize)]
#[serde(untagged)]
enum GenerationResponse {
    Flat(Vec<GeneratedText>),
    Nested(Vec<Vec<GeneratedText>>),
    Single(GeneratedText),
}

impl GenerationResponse {
    fn into_texts(self) -> Vec<String> {
        match self {
            Self::Flat(items) => items.into_iter().map(|g| g.generated_text).collect(),
            Self::Nested(items) => items
                .into_iter()
                .filter_map(|mut inner| (!inner.is_empty()).then(|| inner.remove(0).generated_text))
                .collect(),
            Self::Single(item) => vec![item.generated_text],
        }
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let mut outputs = self.generate_batch(&[prompt], cancel).await?;
        outputs
            .pop()
            .ok_or_else(|| RagError::GenerationUnavailable("model returned no output".into()))
    }

    async fn generate_batch(
        &self,
        prompts: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch_size = prompts.len(), "generating");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(RagError::GenerationUnavailable("generation cancelled".into()))
            }
            result = self.send(prompts) => result,
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
