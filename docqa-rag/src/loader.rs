//! PDF loading.
//!
//! Text extraction runs on the blocking pool because `pdf-extract` is CPU-bound
//! and may panic on malformed input; a panic is reported as
//! [`RagError::UnsupportedFormat`] rather than tearing down the caller.

use std::path::Path;

use tracing::{debug, error};

use crate::document::Page;
use crate::error::{RagError, Result};

/// Magic bytes every PDF file starts with.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Check that an upload looks like a PDF by name and content.
///
/// # Errors
///
/// Returns [`RagError::EmptyContent`] for a zero-byte payload and
/// [`RagError::UnsupportedFormat`] when the extension or magic bytes are wrong.
pub fn ensure_pdf(filename: &str, bytes: &[u8]) -> Result<()> {
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(RagError::UnsupportedFormat("Only PDF files are supported.".to_string()));
    }
    if bytes.is_empty() {
        return Err(RagError::EmptyContent(format!("'{filename}' is empty")));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(RagError::UnsupportedFormat(format!("'{filename}' is not a PDF document")));
    }
    Ok(())
}

/// Extract one [`Page`] per PDF page from raw bytes.
pub async fn load_pdf_bytes(bytes: Vec<u8>) -> Result<Vec<Page>> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(RagError::UnsupportedFormat("missing PDF header".to_string()));
    }

    let pages = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
    })
    .await
    .map_err(|e| {
        error!(error = %e, "pdf extraction task failed");
        RagError::UnsupportedFormat(format!("PDF could not be parsed: {e}"))
    })?
    .map_err(|e| RagError::UnsupportedFormat(format!("PDF extraction error: {e}")))?;

    debug!(page_count = pages.len(), "extracted pdf pages");
    Ok(pages.into_iter().enumerate().map(|(i, text)| Page::new(i, text)).collect())
}

/// Read a PDF from disk and extract its pages.
pub async fn load_pdf(path: impl AsRef<Path>) -> Result<Vec<Page>> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await?;
    load_pdf_bytes(bytes).await
}
