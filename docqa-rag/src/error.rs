//! Error types for the `docqa-rag` crate.

use thiserror::Error;

/// Errors that can occur while ingesting documents or answering questions.
#[derive(Debug, Error)]
pub enum RagError {
    /// Chunking or retrieval parameters are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An index build was requested with no chunks and no existing index.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// A metadata filter was supplied but carries no constraints.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The document is not of the expected type.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The document produced no usable chunks.
    #[error("Empty content: {0}")]
    EmptyContent(String),

    /// The text-generation model could not produce an answer.
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// The vector index could not be loaded or built.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// Generation exceeded the bounded wait.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The index was built with a different embedding model than the one querying it.
    #[error(
        "Embedding model mismatch: index built with '{index_model}', provider is '{provider_model}'"
    )]
    EmbeddingMismatch {
        /// Model identifier recorded in the index manifest.
        index_model: String,
        /// Model identifier reported by the provider.
        provider_model: String,
    },

    /// The persisted index is malformed or inconsistent.
    #[error("Index error: {0}")]
    Index(String),

    /// Filesystem failure while reading or writing an index or document.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure encoding or decoding persisted index files.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Whether this error stems from caller input rather than a failing dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_)
                | Self::MissingInput(_)
                | Self::InvalidFilter(_)
                | Self::UnsupportedFormat(_)
                | Self::EmptyContent(_)
        )
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
