//! Data types for pages, chunks, metadata filters, and search results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// A unit of raw document text, usually one PDF page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    /// Zero-based page index, or `None` when the source has no pagination.
    pub index: Option<usize>,
    /// The extracted page text.
    pub text: String,
}

impl Page {
    /// Create a page with a known zero-based index.
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self { index: Some(index), text: text.into() }
    }

    /// Create an unpaginated page, e.g. for plain-text sources.
    pub fn unpaginated(text: impl Into<String>) -> Self {
        Self { index: None, text: text.into() }
    }
}

/// A loaded source document: an identifier plus its pages in reading order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// Pages in reading order.
    pub pages: Vec<Page>,
}

impl Document {
    /// Create a document from already-extracted pages.
    pub fn new(id: impl Into<String>, pages: Vec<Page>) -> Self {
        Self { id: id.into(), pages }
    }

    /// Wrap plain text as a single unpaginated page.
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, vec![Page::unpaginated(text)])
    }
}

/// Coarse section label derived from the page a chunk came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Section {
    Introduction,
    Methods,
    Results,
    #[serde(rename = "other")]
    Other,
}

impl Section {
    /// Label a chunk by its originating page: pages 0–1 are the introduction,
    /// pages 2–3 the methods, everything later the results.
    pub fn from_page(index: Option<usize>) -> Self {
        match index {
            Some(0..=1) => Self::Introduction,
            Some(2..=3) => Self::Methods,
            Some(_) => Self::Results,
            None => Self::Other,
        }
    }

    /// The label as stored in chunk metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Introduction => "Introduction",
            Self::Methods => "Methods",
            Self::Results => "Results",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded span of document text with positional metadata.
///
/// Chunks are created by the chunker and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Unique identifier, `{document_id}_{chunk_index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Identifier of the source document.
    pub document_id: String,
    /// Zero-based page the chunk was taken from, if the source is paginated.
    pub page: Option<usize>,
    /// Section label derived from `page`.
    pub section: Section,
}

impl Chunk {
    /// Look up a metadata field by name.
    ///
    /// Recognised keys are `document_id`, `page`, and `section`.
    pub fn metadata_value(&self, key: &str) -> Option<String> {
        match key {
            "document_id" => Some(self.document_id.clone()),
            "page" => self.page.map(|p| p.to_string()),
            "section" => Some(self.section.as_str().to_string()),
            _ => None,
        }
    }
}

/// Equality constraints on chunk metadata used to narrow a search.
///
/// A filter that is present must carry at least one constraint; see
/// [`MetadataFilter::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct MetadataFilter {
    constraints: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// Create an empty filter. Add constraints with [`with`](Self::with).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the section label only.
    pub fn section(section: Section) -> Self {
        Self::new().with("section", section.as_str())
    }

    /// Add an equality constraint.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    /// Whether the filter carries no constraints.
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Reject filters that are present but constrain nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidFilter`] when the filter has no constraints.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(RagError::InvalidFilter(
                "metadata filter must specify at least one constraint".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether every constraint matches the chunk's metadata.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.constraints
            .iter()
            .all(|(key, value)| chunk.metadata_value(key).as_deref() == Some(value.as_str()))
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_on_page(page: Option<usize>) -> Chunk {
        Chunk {
            id: "doc_0".into(),
            text: "text".into(),
            document_id: "doc".into(),
            page,
            section: Section::from_page(page),
        }
    }

    #[test]
    fn section_thresholds() {
        assert_eq!(Section::from_page(Some(0)), Section::Introduction);
        assert_eq!(Section::from_page(Some(1)), Section::Introduction);
        assert_eq!(Section::from_page(Some(2)), Section::Methods);
        assert_eq!(Section::from_page(Some(3)), Section::Methods);
        assert_eq!(Section::from_page(Some(4)), Section::Results);
        assert_eq!(Section::from_page(None), Section::Other);
    }

    #[test]
    fn filter_matches_all_constraints() {
        let chunk = chunk_on_page(Some(2));
        assert!(MetadataFilter::section(Section::Methods).matches(&chunk));
        assert!(!MetadataFilter::section(Section::Results).matches(&chunk));
        assert!(MetadataFilter::new().with("section", "Methods").with("page", "2").matches(&chunk));
        assert!(!MetadataFilter::new().with("page", "3").matches(&chunk));
        assert!(!MetadataFilter::new().with("unknown", "x").matches(&chunk));
    }

    #[test]
    fn filter_values_match_exactly() {
        let chunk = chunk_on_page(Some(2));
        assert!(!MetadataFilter::new().with("section", "methods").matches(&chunk));
        assert!(!MetadataFilter::new().with("section", "Meth").matches(&chunk));
        assert!(!MetadataFilter::new().with("page", "").matches(&chunk));
    }

    #[test]
    fn empty_filter_fails_validation() {
        assert!(matches!(MetadataFilter::new().validate(), Err(RagError::InvalidFilter(_))));
        assert!(MetadataFilter::section(Section::Results).validate().is_ok());
    }
}
