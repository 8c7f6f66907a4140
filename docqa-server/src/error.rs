use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docqa_rag::RagError;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to HTTP clients as `{"detail": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RagError> for ApiError {
    fn from(error: RagError) -> Self {
        match error {
            RagError::UnsupportedFormat(detail) | RagError::EmptyContent(detail) => {
                Self::BadRequest(detail)
            }
            RagError::Timeout(after) => Self::Timeout(after),
            other if other.is_client_error() => Self::BadRequest(other.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rag_errors_map_to_statuses() {
        let unsupported: ApiError =
            RagError::UnsupportedFormat("Only PDF files are supported.".into()).into();
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
        assert_eq!(unsupported.to_string(), "Only PDF files are supported.");

        let timeout: ApiError = RagError::Timeout(Duration::from_secs(30)).into();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.to_string(), "Query timed out after 30s");

        let index: ApiError = RagError::Index("corrupt".into()).into();
        assert_eq!(index.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
