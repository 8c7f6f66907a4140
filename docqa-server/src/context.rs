//! Components shared by every request.
//!
//! Startup is best-effort: each component either becomes ready or records why
//! it is unavailable, and the service comes up either way. Requests that need
//! a missing component get a placeholder answer instead of an error.

use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;
use docqa_rag::{
    DecodingConfig, EmbeddingProvider, HashingEmbeddingProvider, HttpGenerator, IndexRetriever,
    OpenAIEmbeddingProvider, QaChain, RagConfig, RagError, TextGenerator, VectorIndex, pipeline,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::settings::{HASHING_EMBEDDING_MODEL, Settings};
use crate::uploads::UploadLog;
use crate::worker::WorkerPool;

/// Outcome of bringing up one component.
#[derive(Debug, Clone)]
pub enum ComponentStatus<T> {
    Ready(T),
    Unavailable(String),
}

impl<T> ComponentStatus<T> {
    pub fn from_result<E: fmt::Display>(component: &str, result: Result<T, E>) -> Self {
        match result {
            Ok(value) => {
                info!(component, "component ready");
                Self::Ready(value)
            }
            Err(e) => {
                warn!(component, error = %e, "component unavailable");
                Self::Unavailable(e.to_string())
            }
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// `"ready"` or `"unavailable: <reason>"`.
    pub fn describe(&self) -> String {
        match self {
            Self::Ready(_) => "ready".to_string(),
            Self::Unavailable(reason) => format!("unavailable: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Ready,
    Degraded,
}

pub struct AppContext {
    pub settings: Settings,
    pub rag_config: RagConfig,
    pub embedder: ComponentStatus<Arc<dyn EmbeddingProvider>>,
    pub generator: ComponentStatus<Arc<dyn TextGenerator>>,
    pub index: ComponentStatus<Arc<VectorIndex>>,
    pub chain: ComponentStatus<Arc<QaChain>>,
    pub uploads: ComponentStatus<UploadLog>,
    pub workers: WorkerPool,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("embedder", &self.embedder.describe())
            .field("generator", &self.generator.describe())
            .field("index", &self.index.describe())
            .field("chain", &self.chain.describe())
            .field("uploads", &self.uploads.describe())
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Bring up every component from `settings`.
    ///
    /// Fails only on settings that can never work (inconsistent chunking
    /// parameters). Unreachable models, a missing default document, or an
    /// unreachable database leave the service in degraded mode.
    pub async fn initialize(settings: Settings) -> anyhow::Result<Self> {
        let rag_config = settings.rag_config().context("invalid chunking settings")?;

        for dir in [&settings.data_dir, &settings.db_dir] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(dir = %dir.display(), error = %e, "could not create directory");
            }
        }

        let embedder = ComponentStatus::from_result("embedder", build_embedder(&settings));
        let generator = ComponentStatus::from_result("generator", build_generator(&settings));
        let index = ComponentStatus::from_result(
            "index",
            open_default_index(&settings, &rag_config, &embedder).await.map(Arc::new),
        );
        let uploads = ComponentStatus::from_result(
            "upload_log",
            UploadLog::connect(&settings.database_url).await,
        );

        Self::assemble(settings, rag_config, embedder, generator, index, uploads)
    }

    /// Assemble a context from already-built components.
    pub fn from_parts(
        settings: Settings,
        embedder: ComponentStatus<Arc<dyn EmbeddingProvider>>,
        generator: ComponentStatus<Arc<dyn TextGenerator>>,
        index: ComponentStatus<Arc<VectorIndex>>,
        uploads: ComponentStatus<UploadLog>,
    ) -> anyhow::Result<Self> {
        let rag_config = settings.rag_config().context("invalid chunking settings")?;
        Self::assemble(settings, rag_config, embedder, generator, index, uploads)
    }

    fn assemble(
        settings: Settings,
        rag_config: RagConfig,
        embedder: ComponentStatus<Arc<dyn EmbeddingProvider>>,
        generator: ComponentStatus<Arc<dyn TextGenerator>>,
        index: ComponentStatus<Arc<VectorIndex>>,
        uploads: ComponentStatus<UploadLog>,
    ) -> anyhow::Result<Self> {
        let workers = WorkerPool::new(settings.max_concurrent_jobs, settings.request_timeout());
        let mut context = Self {
            settings,
            rag_config,
            embedder,
            generator,
            index,
            chain: ComponentStatus::Unavailable("not initialized".to_string()),
            uploads,
            workers,
        };

        context.chain = match &context.index {
            ComponentStatus::Ready(index) => ComponentStatus::from_result(
                "chain",
                context.chain_over(Arc::clone(index)).map(Arc::new),
            ),
            ComponentStatus::Unavailable(reason) => {
                ComponentStatus::Unavailable(format!("default index unavailable: {reason}"))
            }
        };

        info!(mode = ?context.mode(), "application context ready");
        Ok(context)
    }

    /// A question-answering chain over `index` using the shared embedder and
    /// generator.
    pub fn chain_over(&self, index: Arc<VectorIndex>) -> Result<QaChain, RagError> {
        let embedder = match &self.embedder {
            ComponentStatus::Ready(embedder) => Arc::clone(embedder),
            ComponentStatus::Unavailable(reason) => {
                return Err(RagError::IndexUnavailable(format!("embedder unavailable: {reason}")));
            }
        };
        let generator = match &self.generator {
            ComponentStatus::Ready(generator) => Arc::clone(generator),
            ComponentStatus::Unavailable(reason) => {
                return Err(RagError::GenerationUnavailable(reason.clone()));
            }
        };

        QaChain::builder()
            .retriever(Arc::new(IndexRetriever::new(index, embedder)?))
            .generator(generator)
            .top_k(self.rag_config.top_k)
            .build()
    }

    /// `Ready` only when the default question-answering path works end to end.
    pub fn mode(&self) -> ServiceMode {
        if self.chain.is_ready() { ServiceMode::Ready } else { ServiceMode::Degraded }
    }
}

fn build_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>, RagError> {
    if settings.embedding_model == HASHING_EMBEDDING_MODEL {
        return Ok(Arc::new(HashingEmbeddingProvider::new(settings.embedding_dimensions)));
    }

    let endpoint = settings.embedding_endpoint.as_deref().ok_or_else(|| RagError::Embedding {
        provider: "openai".to_string(),
        message: "no embedding_endpoint configured".to_string(),
    })?;
    let mut provider = OpenAIEmbeddingProvider::new(
        endpoint,
        &settings.embedding_model,
        settings.embedding_dimensions,
    )?;
    if let Some(key) = &settings.api_key {
        provider = provider.with_api_key(key);
    }
    Ok(Arc::new(provider))
}

fn build_generator(settings: &Settings) -> Result<Arc<dyn TextGenerator>, RagError> {
    let endpoint = settings.llm_endpoint.as_deref().ok_or_else(|| {
        RagError::GenerationUnavailable(format!(
            "no llm_endpoint configured for '{}'",
            settings.llm_model
        ))
    })?;
    let mut generator =
        HttpGenerator::new(endpoint, &settings.llm_model, DecodingConfig::default())?;
    if let Some(key) = &settings.api_key {
        generator = generator.with_api_key(key);
    }
    Ok(Arc::new(generator))
}

/// Load the default index, building it from the default document on first run.
async fn open_default_index(
    settings: &Settings,
    rag_config: &RagConfig,
    embedder: &ComponentStatus<Arc<dyn EmbeddingProvider>>,
) -> Result<VectorIndex, RagError> {
    let embedder = match embedder {
        ComponentStatus::Ready(embedder) => embedder.as_ref(),
        ComponentStatus::Unavailable(reason) => {
            return Err(RagError::IndexUnavailable(format!("embedder unavailable: {reason}")));
        }
    };

    let location = settings.default_index_dir();
    if VectorIndex::is_built(&location).await {
        return VectorIndex::load_or_create(None, &location, embedder).await;
    }

    let document = settings.default_pdf_path();
    if !tokio::fs::try_exists(&document).await.unwrap_or(false) {
        return Err(RagError::IndexUnavailable(format!(
            "no index at '{}' and no default document at '{}'",
            location.display(),
            document.display()
        )));
    }
    info!(document = %document.display(), "building default index");
    pipeline::ingest_pdf(&document, &location, rag_config, embedder).await
}
