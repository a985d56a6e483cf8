use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tutorqa::chat::ChatService;
use tutorqa::config::{AppConfig, ChunkConfig, ModelConfig};
use tutorqa::gemini::GeminiClient;
use tutorqa::ingest::Ingestor;
use tutorqa::ollama::OllamaClient;
use tutorqa::retrieval::Retriever;
use tutorqa::server::{build_router, AppState};
use tutorqa::vector_store::VectorStore;

const BOUNDARY: &str = "tutorqa-test-boundary";
const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

struct Harness {
    router: Router,
    data: TempDir,
    ollama: ServerGuard,
    gemini: ServerGuard,
}

async fn harness() -> Harness {
    let data = tempfile::tempdir().unwrap();
    let mut ollama = mockito::Server::new_async().await;
    let gemini = mockito::Server::new_async().await;

    ollama
        .mock("POST", "/api/embed")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"embeddings":[[0.1,0.2,0.3]]}"#)
        .create_async()
        .await;

    let config = AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        upload_dir: data.path().join("uploads"),
        index_dir: data.path().join("index"),
        ollama_base_url: ollama.url(),
        gemini_base_url: gemini.url(),
        gemini_api_key: Some("test-key".to_string()),
        max_upload_bytes: 1024 * 1024,
        models: ModelConfig {
            answer_model: "gemini-1.5-flash".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_context_tokens: 256,
            max_output_tokens: 512,
        },
        chunks: ChunkConfig {
            chunk_size: 200,
            chunk_overlap: 20,
            top_k: 4,
        },
    };

    let ollama_client = OllamaClient::new(config.ollama_base_url.clone())
        .with_context_tokens(config.models.embedding_context_tokens);
    let store = VectorStore::new(config.index_path());
    let retriever = Retriever::new(
        store.clone(),
        ollama_client.clone(),
        config.models.embedding_model.clone(),
    );
    let chat = ChatService::new(
        config.clone(),
        retriever,
        GeminiClient::new(config.gemini_base_url.clone(), "test-key"),
    );
    let ingestor = Ingestor::new(config.clone(), ollama_client, store).unwrap();

    Harness {
        router: build_router(AppState::new(config, chat, ingestor)),
        data,
        ollama,
        gemini,
    }
}

async fn mock_answer(server: &mut ServerGuard, answer: &str) -> Mock {
    let body = serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": answer }] },
            "finishReason": "STOP"
        }]
    });

    server
        .mock("POST", GENERATE_PATH)
        .match_header("x-goog-api-key", "test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

fn multipart_body(parts: &[(&str, &str, &str)]) -> String {
    let mut body = String::new();
    for (field, filename, content) in parts {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

async fn upload(router: &Router, parts: &[(&str, &str, &str)]) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    send(router, request).await
}

async fn ask(router: &Router, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/ask")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn ask_before_any_upload_reports_no_index() {
    let h = harness().await;

    let (status, body) = ask(&h.router, r#"{"question": "What is a cell?"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No documents indexed");
}

#[tokio::test]
async fn malformed_ask_bodies_get_usage_message() {
    let h = harness().await;
    let usage = "Send JSON like {'question': 'your question'}";

    for body in ["not json", "{}", r#"{"q": "hi"}"#, r#"{"question": 42}"#, r#"{"question": "   "}"#] {
        let (status, json) = ask(&h.router, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(json["error"], usage, "body {body}");
    }

    let request = Request::builder()
        .method("POST")
        .uri("/ask")
        .body(Body::from(r#"{"question": "no content type"}"#))
        .unwrap();
    let (status, json) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], usage);
}

#[tokio::test]
async fn upload_without_files_is_rejected() {
    let h = harness().await;

    let (status, body) = upload(&h.router, &[("notes", "a.txt", "text")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No files uploaded");

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No files uploaded");
}

#[tokio::test]
async fn upload_then_ask_round_trip() {
    let mut h = harness().await;
    let answer = mock_answer(&mut h.gemini, "## Definition\n- Mitochondria make ATP.").await;

    let notes = "Mitochondria are organelles that produce ATP through cellular respiration.\n\n\
                 Ribosomes translate messenger RNA into proteins.";
    let (status, body) = upload(&h.router, &[("files", "cell notes.txt", notes)]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "index built");
    assert_eq!(body["docs"], 1);
    assert!(body["chunks"].as_u64().unwrap() >= 1);
    assert!(h.data.path().join("uploads").join("cell_notes.txt").exists());
    assert!(h.data.path().join("index").join("index.sqlite3").exists());

    let (status, body) = ask(&h.router, r#"{"question": "What do mitochondria do?"}"#).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answer"], "## Definition\n- Mitochondria make ATP.");

    let sources = body["sources"].as_array().unwrap();
    assert!(!sources.is_empty());
    assert!(sources[0]["source"].as_str().unwrap().ends_with("cell_notes.txt"));
    assert!(sources[0]["snippet"].as_str().unwrap().starts_with("Mitochondria"));

    answer.assert_async().await;
}

#[tokio::test]
async fn prompt_carries_context_and_question() {
    let mut h = harness().await;
    let generate = h
        .gemini
        .mock("POST", GENERATE_PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r"\[[^\]]*osmosis\.txt\] Osmosis moves water".to_string()),
            Matcher::Regex(r"QUESTION:\\nExplain osmosis".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"Osmosis explained."}]}}]}"#)
        .create_async()
        .await;

    let (status, _) = upload(
        &h.router,
        &[("files", "osmosis.txt", "Osmosis moves water across a membrane.")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ask(&h.router, r#"{"question": "Explain osmosis", "top_k": 1}"#).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);
    generate.assert_async().await;
}

#[tokio::test]
async fn question_reaches_prompt_verbatim() {
    let mut h = harness().await;
    let generate = h
        .gemini
        .mock("POST", GENERATE_PATH)
        .match_body(Matcher::Regex(r"QUESTION:\\n  Explain osmosis  \\n".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"Osmosis explained."}]}}]}"#)
        .create_async()
        .await;

    let (status, _) = upload(&h.router, &[("files", "osmosis.txt", "Osmosis moves water.")]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ask(&h.router, r#"{"question": "  Explain osmosis  "}"#).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    generate.assert_async().await;
}

#[tokio::test]
async fn pdf_pages_are_indexed_and_cited() {
    let mut h = harness().await;
    mock_answer(&mut h.gemini, "Energy answer.").await;

    let pdf = std::fs::read_to_string(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/two_pages.pdf"),
    )
    .unwrap();
    let (status, body) = upload(&h.router, &[("files", "biology.pdf", &pdf)]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["docs"], 2);
    assert_eq!(body["chunks"], 2);

    let (status, body) = ask(&h.router, r#"{"question": "Where does energy come from?", "top_k": 10}"#).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["page"], 1);
    assert_eq!(sources[1]["page"], 2);
    assert!(sources[0]["source"].as_str().unwrap().ends_with("biology.pdf"));
    assert!(sources[0]["snippet"].as_str().unwrap().contains("Photosynthesis"));
    assert!(sources[1]["snippet"].as_str().unwrap().contains("Mitochondria"));
}

#[tokio::test]
async fn second_upload_replaces_first() {
    let mut h = harness().await;
    mock_answer(&mut h.gemini, "Answer.").await;

    let (status, _) = upload(&h.router, &[("files", "first.txt", "Alpha content.")]).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = upload(&h.router, &[("files", "second.txt", "Beta content.")]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ask(&h.router, r#"{"question": "What is here?", "top_k": 10}"#).await;
    assert_eq!(status, StatusCode::OK);
    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0]["source"].as_str().unwrap().ends_with("second.txt"));
}

#[tokio::test]
async fn index_without_text_counts_as_no_index() {
    let h = harness().await;

    let (status, body) = upload(&h.router, &[("files", "blank.txt", "   ")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunks"], 0);

    let (status, body) = ask(&h.router, r#"{"question": "Anything?"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No documents indexed");
}

#[tokio::test]
async fn embedding_failure_is_a_server_error() {
    let mut h = harness().await;
    h.ollama.reset();
    h.ollama
        .mock("POST", Matcher::Any)
        .with_status(500)
        .with_body(r#"{"error":"model crashed"}"#)
        .create_async()
        .await;

    let (status, body) = upload(&h.router, &[("files", "a.txt", "Some text.")]).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("failed embedding"));
}

#[tokio::test]
async fn home_page_renders() {
    let h = harness().await;
    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("name=\"files\""));
    assert!(html.contains("Top 4 chunks"));
}
