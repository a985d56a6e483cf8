use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use askama::Template;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::chat::{ChatError, ChatService};
use crate::config::AppConfig;
use crate::ingest::Ingestor;
use crate::models::{AskRequest, AskResponse, UploadResponse};
use crate::uploads::save_upload;

const NO_FILES_MESSAGE: &str = "No files uploaded";
const ASK_USAGE_MESSAGE: &str = "Send JSON like {'question': 'your question'}";

#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    chat: ChatService,
    ingestor: Ingestor,
}

impl AppState {
    pub fn new(config: AppConfig, chat: ChatService, ingestor: Ingestor) -> Self {
        Self {
            config: Arc::new(config),
            chat,
            ingestor,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(index_page))
        .route("/upload", post(upload_handler))
        .route("/ask", post(ask_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: AppConfig, chat: ChatService, ingestor: Ingestor) -> Result<()> {
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let addr: SocketAddr = config.bind_addr.parse()?;
    let app = build_router(AppState::new(config, chat, ingestor));

    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let template = IndexTemplate {
        top_k: state.config.chunks.top_k,
        embedding_model: &state.config.models.embedding_model,
        answer_model: &state.config.models.answer_model,
    };
    Ok(Html(template.render()?))
}

async fn upload_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let Ok(mut multipart) = multipart else {
        return Err(ApiError::bad_request(NO_FILES_MESSAGE));
    };

    let mut saved: Vec<PathBuf> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("malformed upload: {err}")))?
    {
        if field.name() != Some("files") {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("malformed upload: {err}")))?;

        // Browsers submit an empty, unnamed part for an untouched file input.
        if bytes.is_empty() && filename.as_deref().map_or(true, str::is_empty) {
            continue;
        }

        saved.push(save_upload(&state.config.upload_dir, filename.as_deref(), &bytes).await?);
    }

    if saved.is_empty() {
        return Err(ApiError::bad_request(NO_FILES_MESSAGE));
    }

    tracing::info!("received {} files", saved.len());
    let result = state.ingestor.ingest(&saved).await?;

    Ok(Json(UploadResponse {
        status: "index built".to_string(),
        docs: result.doc_count,
        chunks: result.chunk_count,
    }))
}

async fn ask_handler(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    let Ok(Json(request)) = payload else {
        return Err(ApiError::bad_request(ASK_USAGE_MESSAGE));
    };

    if request.question.trim().is_empty() {
        return Err(ApiError::bad_request(ASK_USAGE_MESSAGE));
    }

    let answer = state.chat.answer(&request.question, request.top_k).await?;
    Ok(Json(answer))
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    top_k: usize,
    embedding_model: &'a str,
    answer_model: &'a str,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", value);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(value: ChatError) -> Self {
        match value {
            ChatError::NoIndex => Self::bad_request(ChatError::NoIndex.to_string()),
            ChatError::Other(err) => Self::from(err),
        }
    }
}

impl From<askama::Error> for ApiError {
    fn from(value: askama::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
