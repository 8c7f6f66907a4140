//! Retrieval-augmented question answering.
//!
//! A [`QaChain`] binds a [`Retriever`] and a [`TextGenerator`]: it retrieves
//! the top-k chunks for a question, renders them into a fixed instruction
//! prompt, and returns the generated answer together with the chunks it was
//! conditioned on.
//!
//! The prompt asks the model to answer only from the context and to fall back
//! to [`FALLBACK_ANSWER`] otherwise. The chain does not enforce this: answers
//! are classified with [`inspect_answer`] and non-conforming ones are logged,
//! never retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{QaChain, IndexRetriever};
//!
//! let chain = QaChain::builder()
//!     .retriever(Arc::new(IndexRetriever::new(index, embedder)?))
//!     .generator(Arc::new(generator))
//!     .top_k(3)
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! let answer = chain.ask("What is retrieval-augmented generation?", &cancel).await?;
//! println!("{} ({} sources)", answer.answer, answer.sources.len());
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DEFAULT_TOP_K;
use crate::document::{MetadataFilter, SearchResult};
use crate::error::{RagError, Result};
use crate::generation::TextGenerator;
use crate::retriever::Retriever;

/// The exact reply the prompt asks for when the context lacks the answer.
pub const FALLBACK_ANSWER: &str = "I don't know from the document.";

/// Separator placed between retrieved chunks in the prompt context.
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Render the instruction prompt for a question and its retrieved context.
pub fn render_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an expert assistant answering questions using only the provided context.

Instructions:
- Answer in 2-3 complete, factual sentences.
- Use your own words. Do not copy citations, author lists, email addresses, or links.
- If the context does not contain the answer, reply only: \"{FALLBACK_ANSWER}\"
- Do not leave a sentence unfinished and do not repeat yourself.
- End the answer with a full sentence.

Context:
{context}

Question:
{question}

Answer:"
    )
}

/// Join retrieved chunk texts in rank order.
pub fn build_context(sources: &[SearchResult]) -> String {
    sources.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>().join(CONTEXT_SEPARATOR)
}

/// How well a generated answer follows the prompt's formatting rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerConformance {
    /// Ends in terminal punctuation.
    Conforming,
    /// The model declared the context insufficient.
    Fallback,
    /// Empty or cut off mid-sentence.
    Incomplete,
}

/// Classify an answer against the prompt rules.
pub fn inspect_answer(answer: &str) -> AnswerConformance {
    let trimmed = answer.trim();
    if trimmed.to_lowercase().contains(&FALLBACK_ANSWER.to_lowercase()) {
        return AnswerConformance::Fallback;
    }
    let ends_sentence = trimmed
        .trim_end_matches(['"', '\'', ')', '\u{201d}'])
        .ends_with(['.', '!', '?']);
    if ends_sentence { AnswerConformance::Conforming } else { AnswerConformance::Incomplete }
}

/// A generated answer and the evidence it was conditioned on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// Generated text.
    pub answer: String,
    /// Retrieved chunks in rank order.
    pub sources: Vec<SearchResult>,
}

impl Answer {
    /// Classify the answer text; see [`inspect_answer`].
    pub fn conformance(&self) -> AnswerConformance {
        inspect_answer(&self.answer)
    }
}

/// Retriever + generator behind a single `ask` contract.
///
/// Construct one via [`QaChain::builder()`].
pub struct QaChain {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn TextGenerator>,
    top_k: usize,
}

impl std::fmt::Debug for QaChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QaChain")
            .field("generator", &self.generator.model_id())
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl QaChain {
    /// Create a new [`QaChainBuilder`].
    pub fn builder() -> QaChainBuilder {
        QaChainBuilder::default()
    }

    /// Default number of chunks retrieved per question.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer a question from the default top-k chunks, unfiltered.
    pub async fn ask(&self, question: &str, cancel: &CancellationToken) -> Result<Answer> {
        self.ask_with(question, self.top_k, None, cancel).await
    }

    /// Answer a question from the `top_k` chunks matching `filter`.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidFilter`] if `filter` is present but empty
    /// - [`RagError::GenerationUnavailable`] if the model cannot answer
    pub async fn ask_with(
        &self,
        question: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        let sources = self.retriever.retrieve(question, top_k, filter).await?;
        let prompt = render_prompt(&build_context(&sources), question);
        let answer = self.generator.generate(&prompt, cancel).await?;
        let answer = Answer { answer, sources };
        log_answer(&answer);
        Ok(answer)
    }

    /// Answer several questions with one batched generation call.
    pub async fn ask_batch(
        &self,
        questions: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<Answer>> {
        let mut retrieved = Vec::with_capacity(questions.len());
        let mut prompts = Vec::with_capacity(questions.len());
        for question in questions {
            let sources = self.retriever.retrieve(question, self.top_k, None).await?;
            prompts.push(render_prompt(&build_context(&sources), question));
            retrieved.push(sources);
        }

        let prompt_refs: Vec<&str> = prompts.iter().map(String::as_str).collect();
        let outputs = self.generator.generate_batch(&prompt_refs, cancel).await?;
        if outputs.len() != questions.len() {
            return Err(RagError::GenerationUnavailable(format!(
                "expected {} answers, got {}",
                questions.len(),
                outputs.len()
            )));
        }

        let answers: Vec<Answer> = outputs
            .into_iter()
            .zip(retrieved)
            .map(|(answer, sources)| Answer { answer, sources })
            .collect();
        answers.iter().for_each(log_answer);
        Ok(answers)
    }
}

fn log_answer(answer: &Answer) {
    let conformance = answer.conformance();
    if conformance == AnswerConformance::Incomplete {
        warn!(answer_len = answer.answer.len(), "answer does not end with a full sentence");
    }
    info!(source_count = answer.sources.len(), ?conformance, "answered question");
}

/// Builder for constructing a [`QaChain`].
///
/// `retriever` and `generator` are required; `top_k` defaults to 3.
#[derive(Default)]
pub struct QaChainBuilder {
    retriever: Option<Arc<dyn Retriever>>,
    generator: Option<Arc<dyn TextGenerator>>,
    top_k: Option<usize>,
}

impl QaChainBuilder {
    /// Set the retriever.
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the default number of chunks retrieved per question.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Build the [`QaChain`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a required field is missing
    /// or `top_k` is zero.
    pub fn build(self) -> Result<QaChain> {
        let retriever = self
            .retriever
            .ok_or_else(|| RagError::InvalidConfiguration("retriever is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::InvalidConfiguration("generator is required".to_string()))?;
        let top_k = self.top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            return Err(RagError::InvalidConfiguration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        Ok(QaChain { retriever, generator, top_k })
    }
}
