//! # docqa-rag
//!
//! Retrieval-augmented question answering over PDF documents.
//!
//! ## Overview
//!
//! - [`chunking`]: keyword page filtering, recursive splitting with overlap, section labels
//! - [`index`]: persistent, build-once vector index with exact cosine search
//! - [`retriever`]: top-k search over an index with optional metadata filters
//! - [`generation`]: text generation behind a fixed beam-search decoding policy
//! - [`chain`]: prompt rendering and the `ask(question) -> {answer, sources}` contract
//! - [`pipeline`]: load → chunk → embed → index
//!
//! Embeddings come from an [`EmbeddingProvider`]: [`OpenAIEmbeddingProvider`] for
//! OpenAI-compatible servers or [`HashingEmbeddingProvider`] for offline use.

pub mod chain;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod index;
pub mod loader;
pub mod openai;
pub mod pipeline;
pub mod retriever;

pub use chain::{Answer, AnswerConformance, FALLBACK_ANSWER, QaChain, QaChainBuilder};
pub use chunking::{Chunker, SectionChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, Document, MetadataFilter, Page, SearchResult, Section};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use generation::{DecodingConfig, HttpGenerator, TextGenerator};
pub use hashing::HashingEmbeddingProvider;
pub use index::{IndexManifest, VectorIndex};
pub use openai::OpenAIEmbeddingProvider;
pub use retriever::{IndexRetriever, Retriever};

pub use tokio_util::sync::CancellationToken;
