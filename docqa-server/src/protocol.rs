//! Request and response bodies of the HTTP API.

use std::collections::BTreeMap;

use docqa_rag::{Answer, SearchResult};
use serde::{Deserialize, Serialize};

use crate::context::ServiceMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

/// One retrieved chunk backing an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub chunk_id: String,
    pub document_id: String,
    pub page: Option<usize>,
    pub section: String,
    pub score: f32,
    pub text: String,
}

impl From<SearchResult> for SourceRef {
    fn from(result: SearchResult) -> Self {
        let SearchResult { chunk, score } = result;
        Self {
            section: chunk.section.as_str().to_string(),
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            page: chunk.page,
            score,
            text: chunk.text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerResponse {
    pub answer: String,
    /// Set when the text is a stand-in because a component is unavailable.
    #[serde(default)]
    pub placeholder: bool,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

impl AnswerResponse {
    pub fn placeholder(question: &str, reason: &str) -> Self {
        Self {
            answer: format!(
                "[placeholder] No generated answer is available ({reason}). \
                 Question received: {question}"
            ),
            placeholder: true,
            sources: Vec::new(),
        }
    }
}

impl From<Answer> for AnswerResponse {
    fn from(answer: Answer) -> Self {
        Self {
            answer: answer.answer,
            placeholder: false,
            sources: answer.sources.into_iter().map(SourceRef::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadResponse {
    pub upload_id: String,
    pub chunk_count: usize,
    /// False when the chunks could not be embedded into a per-upload index.
    pub indexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_error: Option<String>,
    /// Absent when the upload carried no question.
    #[serde(flatten)]
    pub result: Option<AnswerResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when the bookkeeping database answers, `"fail"` otherwise.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_error: Option<String>,
    pub mode: ServiceMode,
    pub components: BTreeMap<&'static str, String>,
}
