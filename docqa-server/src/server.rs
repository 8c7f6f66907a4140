use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use docqa_rag::{QaChain, RagError, loader, pipeline};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::{AppContext, ComponentStatus};
use crate::error::ApiError;
use crate::protocol::{AnswerResponse, HealthResponse, QueryRequest, UploadResponse};
use crate::settings::Settings;
use crate::worker::WorkerError;

pub type AppState = Arc<AppContext>;

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let body_limit = state.settings.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/upload_query", post(upload_query))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| "invalid host/port for docqa-server")?;

    let context = AppContext::initialize(settings).await?;
    let app = app_router(Arc::new(context));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("docqa-server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, db, db_error) = match &state.uploads {
        ComponentStatus::Ready(log) => match log.ping().await {
            Ok(()) => ("ok", Some("connected"), None),
            Err(e) => ("fail", None, Some(e.to_string())),
        },
        ComponentStatus::Unavailable(reason) => ("fail", None, Some(reason.clone())),
    };

    let components = [
        ("embedder", state.embedder.describe()),
        ("generator", state.generator.describe()),
        ("index", state.index.describe()),
        ("chain", state.chain.describe()),
    ]
    .into_iter()
    .collect();

    Json(HealthResponse { status, db, db_error, mode: state.mode(), components })
}

async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let chain = match &state.chain {
        ComponentStatus::Ready(chain) => Arc::clone(chain),
        ComponentStatus::Unavailable(reason) => {
            return Ok(Json(AnswerResponse::placeholder(question, reason)));
        }
    };
    answer_within_bound(&state, chain, question).await.map(Json)
}

/// Run `chain.ask` on the worker pool.
///
/// Timeouts become [`ApiError::Timeout`]; every other failure is absorbed into
/// a placeholder answer.
async fn answer_within_bound(
    state: &AppContext,
    chain: Arc<QaChain>,
    question: &str,
) -> Result<AnswerResponse, ApiError> {
    let owned = question.to_string();
    let outcome = state
        .workers
        .run(move |cancel| async move { chain.ask(&owned, &cancel).await })
        .await;

    match outcome {
        Ok(Ok(answer)) => Ok(answer.into()),
        Ok(Err(RagError::Timeout(after))) | Err(WorkerError::TimedOut(after)) => {
            warn!(question, timeout = ?after, "query timed out");
            Err(ApiError::Timeout(after))
        }
        Ok(Err(e)) => {
            warn!(question, error = %e, "answering failed, returning placeholder");
            Ok(AnswerResponse::placeholder(question, &e.to_string()))
        }
        Err(e) => {
            warn!(question, error = %e, "answer job failed, returning placeholder");
            Ok(AnswerResponse::placeholder(question, &e.to_string()))
        }
    }
}

struct UploadForm {
    filename: String,
    bytes: Vec<u8>,
    question: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut file = None;
    let mut question = None;

    while let Some(field) =
        multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes =
                    field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("question") => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                question = Some(text);
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("missing 'file' field".to_string()))?;
    let question = question.map(|q| q.trim().to_string()).filter(|q| !q.is_empty());
    Ok(UploadForm { filename, bytes, question })
}

/// Last path component of a client-supplied filename.
fn stored_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pdf".to_string())
}

async fn upload_query(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_upload_form(multipart).await?;
    loader::ensure_pdf(&form.filename, &form.bytes)?;

    let upload_id = Uuid::new_v4().to_string();
    let filename = stored_name(&form.filename);
    let stored = state.settings.data_dir.join(format!("{upload_id}_{filename}"));
    tokio::fs::create_dir_all(&state.settings.data_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("could not create upload directory: {e}")))?;
    tokio::fs::write(&stored, &form.bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("could not store upload: {e}")))?;
    info!(
        upload.id = %upload_id,
        file = %stored.display(),
        bytes = form.bytes.len(),
        "stored upload"
    );

    if let ComponentStatus::Ready(log) = &state.uploads {
        if let Err(e) = log.record(&upload_id, &filename).await {
            warn!(upload.id = %upload_id, error = %e, "could not record upload");
        }
    }

    let chunks = pipeline::chunk_document(
        &stored,
        state.rag_config.chunk_size,
        state.rag_config.chunk_overlap,
    )
    .await?;
    if chunks.is_empty() {
        return Err(RagError::EmptyContent("PDF has no valid content to embed.".to_string()).into());
    }
    let chunk_count = chunks.len();

    let reply = |index_error: Option<String>, result: Option<AnswerResponse>| {
        Json(UploadResponse {
            upload_id: upload_id.clone(),
            chunk_count,
            indexed: index_error.is_none(),
            index_error,
            result,
        })
    };
    let unindexed = |reason: &str| {
        let result = form.question.as_deref().map(|q| AnswerResponse::placeholder(q, reason));
        reply(Some(reason.to_string()), result)
    };

    let embedder = match &state.embedder {
        ComponentStatus::Ready(embedder) => Arc::clone(embedder),
        ComponentStatus::Unavailable(reason) => {
            warn!(upload.id = %upload_id, %reason, "embedder unavailable, upload not indexed");
            return Ok(unindexed(reason));
        }
    };
    let location = state.settings.upload_index_dir(&upload_id);
    let index = match pipeline::ingest_chunks(chunks, &location, embedder.as_ref()).await {
        Ok(index) => Arc::new(index),
        Err(e) if e.is_client_error() => return Err(e.into()),
        Err(e) => {
            warn!(upload.id = %upload_id, error = %e, "could not index upload");
            return Ok(unindexed(&e.to_string()));
        }
    };

    let Some(question) = form.question.as_deref() else {
        return Ok(reply(None, None));
    };
    let chain = match state.chain_over(index) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            let placeholder = AnswerResponse::placeholder(question, &e.to_string());
            return Ok(reply(None, Some(placeholder)));
        }
    };
    let answer = answer_within_bound(&state, chain, question).await?;
    Ok(reply(None, Some(answer)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_name_strips_directories() {
        assert_eq!(stored_name("../../etc/passwd.pdf"), "passwd.pdf");
        assert_eq!(stored_name("paper.pdf"), "paper.pdf");
        assert_eq!(stored_name(""), "upload.pdf");
    }
}
