use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use docqa_rag::{
    CancellationToken, Chunk, EmbeddingProvider, HashingEmbeddingProvider, RagError, Result,
    Section, TextGenerator, VectorIndex,
};
use docqa_server::uploads::UploadLog;
use docqa_server::{AppContext, ComponentStatus, Settings, app_router};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

const DIM: usize = 128;

/// Two pages of running text.
const PAPER_PDF: &[u8] = include_bytes!("fixtures/paper.pdf");
/// Two pages that only hold references and an appendix.
const REFERENCES_PDF: &[u8] = include_bytes!("fixtures/references.pdf");

struct FixedGenerator;

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(&self, _prompt: &str, _cancel: &CancellationToken) -> Result<String> {
        Ok("It pairs a retriever with a sequence to sequence generator.".to_string())
    }

    fn model_id(&self) -> &str {
        "fixed"
    }
}

/// Takes `delay` unless cancelled first, and remembers whether it was.
struct SlowGenerator {
    delay: Duration,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl TextGenerator for SlowGenerator {
    async fn generate(&self, _prompt: &str, cancel: &CancellationToken) -> Result<String> {
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.store(true, Ordering::SeqCst);
                Err(RagError::GenerationUnavailable("cancelled".into()))
            }
            _ = tokio::time::sleep(self.delay) => Ok("too late".to_string()),
        }
    }

    fn model_id(&self) -> &str {
        "slow"
    }
}

struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _prompt: &str, _cancel: &CancellationToken) -> Result<String> {
        Err(RagError::GenerationUnavailable("inference endpoint returned 503".into()))
    }

    fn model_id(&self) -> &str {
        "failing"
    }
}

fn settings(dir: &Path, extra: &str) -> Settings {
    Settings::from_yaml_str(&format!(
        "llm_model: test-llm
embedding_model: feature-hashing
embedding_dimensions: {DIM}
data_dir: {data}
db_dir: {db}
database_url: 'sqlite::memory:'
default_pdf_name: RAG_Paper.pdf
{extra}",
        data = dir.join("data").display(),
        db = dir.join("db").display(),
    ))
    .expect("test settings")
}

async fn default_index(settings: &Settings, embedder: &dyn EmbeddingProvider) -> Arc<VectorIndex> {
    let chunks = [
        "Retrieval augmented generation combines a retriever with a generator.",
        "The generator is a sequence to sequence transformer fine tuned jointly.",
        "Open domain question answering improves with retrieved passages.",
        "References and related work are excluded from indexing.",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| Chunk {
        id: format!("RAG_Paper_{i}"),
        text: text.to_string(),
        document_id: "RAG_Paper".to_string(),
        page: Some(i),
        section: Section::from_page(Some(i)),
    })
    .collect();
    let index = VectorIndex::load_or_create(Some(chunks), settings.default_index_dir(), embedder)
        .await
        .expect("build default index");
    Arc::new(index)
}

async fn context_with(
    dir: &Path,
    extra_settings: &str,
    generator: ComponentStatus<Arc<dyn TextGenerator>>,
) -> AppContext {
    let settings = settings(dir, extra_settings);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddingProvider::new(DIM));
    let index = default_index(&settings, embedder.as_ref()).await;
    let uploads = UploadLog::connect("sqlite::memory:").await.expect("upload log");
    AppContext::from_parts(
        settings,
        ComponentStatus::Ready(embedder),
        generator,
        ComponentStatus::Ready(index),
        ComponentStatus::Ready(uploads),
    )
    .expect("context")
}

async fn spawn_server(context: AppContext) -> (String, tokio::task::JoinHandle<()>) {
    let app = app_router(Arc::new(context));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    (format!("http://{}", addr), handle)
}

fn pdf_form(filename: &str, bytes: Vec<u8>, question: Option<&str>) -> Form {
    let form = Form::new().part("file", Part::bytes(bytes).file_name(filename.to_string()));
    match question {
        Some(question) => form.text("question", question.to_string()),
        None => form,
    }
}

fn upload_indexes(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("db").join("uploads")).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn health_reports_ready_components_and_database() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::get(format!("{base}/health")).await.expect("health response");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("health json");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "connected");
    assert_eq!(body["mode"], "ready");
    assert_eq!(body["components"]["chain"], "ready");

    handle.abort();
}

#[tokio::test]
async fn health_is_ok_status_code_even_when_everything_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), "");
    let context = AppContext::from_parts(
        settings,
        ComponentStatus::Unavailable("embedding endpoint unreachable".into()),
        ComponentStatus::Unavailable("no llm_endpoint configured".into()),
        ComponentStatus::Unavailable("no default document".into()),
        ComponentStatus::Unavailable("connection refused".into()),
    )
    .unwrap();
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::get(format!("{base}/health")).await.expect("health response");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("health json");
    assert_eq!(body["status"], "fail");
    assert_eq!(body["db_error"], "connection refused");
    assert!(body.get("db").is_none());
    assert_eq!(body["mode"], "degraded");

    handle.abort();
}

#[tokio::test]
async fn query_returns_answer_with_ranked_sources() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/query"))
        .json(&json!({"question": "What does retrieval augmented generation combine?"}))
        .send()
        .await
        .expect("query response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("query json");
    assert_eq!(body["placeholder"], false);
    assert_eq!(body["answer"], "It pairs a retriever with a sequence to sequence generator.");
    let sources = body["sources"].as_array().expect("sources");
    assert_eq!(sources.len(), 3);
    assert_eq!(sources[0]["chunk_id"], "RAG_Paper_0");
    assert_eq!(sources[0]["section"], "Introduction");

    handle.abort();
}

#[tokio::test]
async fn degraded_generator_yields_placeholder_with_200() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with(
        dir.path(),
        "",
        ComponentStatus::Unavailable("model failed to load".into()),
    )
    .await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/query"))
        .json(&json!({"question": "What is AI?"}))
        .send()
        .await
        .expect("query response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("query json");
    assert_eq!(body["placeholder"], true);
    let answer = body["answer"].as_str().expect("answer text");
    assert!(answer.contains("What is AI?"));
    assert!(answer.contains("model failed to load"));

    handle.abort();
}

#[tokio::test]
async fn generation_failure_at_request_time_yields_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FailingGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/query"))
        .json(&json!({"question": "What is AI?"}))
        .send()
        .await
        .expect("query response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("query json");
    assert_eq!(body["placeholder"], true);

    handle.abort();
}

#[tokio::test]
async fn slow_generation_times_out_with_504_and_is_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let cancelled = Arc::new(AtomicBool::new(false));
    let generator = SlowGenerator { delay: Duration::from_secs(5), cancelled: cancelled.clone() };
    let context = context_with(
        dir.path(),
        "request_timeout_ms: 200\n",
        ComponentStatus::Ready(Arc::new(generator)),
    )
    .await;
    let (base, handle) = spawn_server(context).await;

    let started = Instant::now();
    let response = reqwest::Client::new()
        .post(format!("{base}/query"))
        .json(&json!({"question": "What is AI?"}))
        .send()
        .await
        .expect("query response");
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json().await.expect("timeout json");
    assert!(body["detail"].as_str().expect("detail").starts_with("Query timed out after"));
    assert!(elapsed < Duration::from_secs(3), "responded after {elapsed:?}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cancelled.load(Ordering::SeqCst));

    handle.abort();
}

#[tokio::test]
async fn blank_question_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/query"))
        .json(&json!({"question": "   "}))
        .send()
        .await
        .expect("query response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    handle.abort();
}

#[tokio::test]
async fn zero_byte_upload_is_rejected_without_creating_an_index() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(pdf_form("empty.pdf", Vec::new(), Some("What is AI?")))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("error json");
    assert!(body["detail"].is_string());
    assert_eq!(upload_indexes(dir.path()), 0);

    handle.abort();
}

#[tokio::test]
async fn non_pdf_upload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(pdf_form("notes.txt", b"plain text notes".to_vec(), None))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["detail"], "Only PDF files are supported.");
    assert_eq!(upload_indexes(dir.path()), 0);

    handle.abort();
}

#[tokio::test]
async fn unreadable_pdf_is_stored_and_logged_but_not_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let log = context.uploads.ready().cloned().expect("upload log");
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(pdf_form("mock.pdf", b"%PDF-1.4 mock content".to_vec(), Some("What is AI?")))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(upload_indexes(dir.path()), 0);
    assert_eq!(log.filenames().await.unwrap(), vec!["mock.pdf".to_string()]);
    let stored: Vec<_> = std::fs::read_dir(dir.path().join("data"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].ends_with("_mock.pdf"));

    handle.abort();
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(Form::new().text("question", "What is AI?"))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    handle.abort();
}

#[tokio::test]
async fn uploaded_pdf_is_indexed_and_answers_from_its_own_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let question = Some("What does the retriever combine with?");
    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(pdf_form("paper.pdf", PAPER_PDF.to_vec(), question))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("upload json");
    let upload_id = body["upload_id"].as_str().expect("upload id").to_string();
    assert_eq!(body["chunk_count"], 2);
    assert_eq!(body["indexed"], true);
    assert!(body.get("index_error").is_none());
    assert_eq!(body["placeholder"], false);
    assert_eq!(body["answer"], "It pairs a retriever with a sequence to sequence generator.");

    let sources = body["sources"].as_array().expect("sources");
    assert!(!sources.is_empty());
    let document_id = format!("{upload_id}_paper");
    assert!(sources.iter().all(|source| source["document_id"] == document_id.as_str()));

    let index_dir = dir.path().join("db").join("uploads").join(&upload_id);
    assert!(index_dir.join("manifest.json").exists());
    assert_eq!(upload_indexes(dir.path()), 1);

    handle.abort();
}

#[tokio::test]
async fn upload_without_question_only_builds_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(pdf_form("paper.pdf", PAPER_PDF.to_vec(), None))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("upload json");
    assert_eq!(body["indexed"], true);
    assert!(body.get("answer").is_none());
    assert_eq!(upload_indexes(dir.path()), 1);

    handle.abort();
}

#[tokio::test]
async fn references_only_upload_is_rejected_without_an_index() {
    let dir = tempfile::tempdir().unwrap();
    let context =
        context_with(dir.path(), "", ComponentStatus::Ready(Arc::new(FixedGenerator))).await;
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(pdf_form("references.pdf", REFERENCES_PDF.to_vec(), Some("What is AI?")))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["detail"], "PDF has no valid content to embed.");
    assert_eq!(upload_indexes(dir.path()), 0);

    handle.abort();
}

#[tokio::test]
async fn upload_reports_unindexed_when_embedder_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = UploadLog::connect("sqlite::memory:").await.expect("upload log");
    let context = AppContext::from_parts(
        settings(dir.path(), ""),
        ComponentStatus::Unavailable("embedding endpoint unreachable".into()),
        ComponentStatus::Ready(Arc::new(FixedGenerator)),
        ComponentStatus::Unavailable("no default document".into()),
        ComponentStatus::Ready(uploads),
    )
    .unwrap();
    let (base, handle) = spawn_server(context).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/upload_query"))
        .multipart(pdf_form("paper.pdf", PAPER_PDF.to_vec(), None))
        .send()
        .await
        .expect("upload response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("upload json");
    assert_eq!(body["chunk_count"], 2);
    assert_eq!(body["indexed"], false);
    assert_eq!(body["index_error"], "embedding endpoint unreachable");
    assert!(body.get("answer").is_none());
    assert_eq!(upload_indexes(dir.path()), 0);

    handle.abort();
}
