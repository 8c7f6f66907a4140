//! Service configuration, read once at startup from a YAML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use docqa_rag::{RagConfig, RagError};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Environment variable overriding `api_key`.
pub const API_KEY_ENV: &str = "DOCQA_API_KEY";

/// Embedding model name that selects the offline feature-hashing embedder.
pub const HASHING_EMBEDDING_MODEL: &str = "feature-hashing";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Generation model identifier.
    pub llm_model: String,
    /// Inference endpoint serving `llm_model`. Without one, answers are placeholders.
    #[serde(default)]
    pub llm_endpoint: Option<String>,
    /// Embedding model identifier, recorded in every index manifest.
    pub embedding_model: String,
    /// OpenAI-compatible embeddings endpoint serving `embedding_model`.
    #[serde(default)]
    pub embedding_endpoint: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// Bearer token for both model endpoints.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Directory where uploaded documents are stored.
    pub data_dir: PathBuf,
    /// Directory holding vector indexes.
    pub db_dir: PathBuf,
    /// Connection string of the upload bookkeeping database.
    #[serde(alias = "postgres_url")]
    pub database_url: String,
    /// Document indexed at startup when no default index exists yet.
    pub default_pdf_name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound on generation jobs running at once, abandoned ones included.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_chunk_size() -> usize {
    docqa_rag::config::DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    docqa_rag::config::DEFAULT_CHUNK_OVERLAP
}

fn default_top_k() -> usize {
    docqa_rag::config::DEFAULT_TOP_K
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Settings {
    /// Parse settings from YAML text.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("invalid settings")
    }

    /// Read settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("in '{}'", path.display()))
    }

    /// Read settings from `$CONFIG_PATH` (default `config.yaml`), applying
    /// environment overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut settings = Self::load(path)?;
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            settings.api_key = Some(key);
        }
        Ok(settings)
    }

    /// Validated chunking and retrieval parameters.
    pub fn rag_config(&self) -> Result<RagConfig, RagError> {
        RagConfig::builder()
            .chunk_size(self.chunk_size)
            .chunk_overlap(self.chunk_overlap)
            .top_k(self.top_k)
            .build()
    }

    /// Bound on waiting for a generated answer.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Index built from the default document.
    pub fn default_index_dir(&self) -> PathBuf {
        self.db_dir.join("default")
    }

    /// Root of the per-upload indexes.
    pub fn uploads_index_root(&self) -> PathBuf {
        self.db_dir.join("uploads")
    }

    /// Index built for one upload.
    pub fn upload_index_dir(&self, upload_id: &str) -> PathBuf {
        self.uploads_index_root().join(upload_id)
    }

    pub fn default_pdf_path(&self) -> PathBuf {
        self.data_dir.join(&self.default_pdf_name)
    }
}
