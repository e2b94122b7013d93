//! HTTP chat server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Site assistant, grounded in the vector index |
//! | `POST` | `/api/librarian` | Librarian, grounded in the book catalog |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Request
//!
//! ```json
//! { "message": "what do you write about?", "messages": [{"role": "user", "content": "hi"}], "stream": true }
//! ```
//!
//! `messages` is the caller-held history. If `message` is omitted, the last
//! user turn in `messages` is the question.
//!
//! # Response shapes
//!
//! `/api/chat` answers with one JSON object unless `stream` is `true` or the
//! client sends `Accept: application/x-ndjson`. `/api/librarian` streams
//! NDJSON unless `stream` is `false`. See [`crate::stream`] for both shapes.
//!
//! # Error contract
//!
//! ```json
//! { "error": "message must not be empty" }
//! ```
//!
//! `400` for an empty or unreadable request, `429` when the provider rate
//! limit is exhausted, `504` when the request budget runs out, `500`
//! otherwise. Provider failures inside the budget are not errors: they
//! produce the fallback answer.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the site's pages can
//! call the API from another origin during development.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::ChatService;
use crate::config::Config;
use crate::error::ChatError;
use crate::models::{ConversationTurn, Role};
use crate::prompt::Variant;
use crate::stream::{ChatChunk, NDJSON_CONTENT_TYPE};

/// Starts the chat server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config, service: Arc<ChatService>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = build_router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "chat server listening");
    println!("chat server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// The full route table, without binding. Used by `run_server` and tests.
pub fn build_router(service: Arc<ChatService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/librarian", post(handle_librarian))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(service)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::EmptyInput => StatusCode::BAD_REQUEST,
            ChatError::ProviderRateLimited => StatusCode::TOO_MANY_REQUESTS,
            ChatError::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Raw provider details stay in the logs.
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %err, "chat request failed");
                "internal error".to_string()
            }
            _ => err.to_string(),
        };
        AppError { status, message }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat, /api/librarian ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Vec<ConversationTurn>,
    #[serde(default)]
    stream: Option<bool>,
}

impl ChatRequest {
    /// Split into the question and the history that precedes it.
    fn into_parts(mut self) -> (String, Vec<ConversationTurn>) {
        if let Some(message) = self.message.take() {
            return (message, self.messages);
        }
        match self.messages.iter().rposition(|t| t.role == Role::User) {
            Some(pos) => {
                let question = self.messages.remove(pos).content;
                self.messages.truncate(pos);
                (question, self.messages)
            }
            None => (String::new(), self.messages),
        }
    }
}

fn wants_ndjson(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(NDJSON_CONTENT_TYPE))
}

async fn handle_chat(
    State(service): State<Arc<ChatService>>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let stream = req.stream.unwrap_or_else(|| wants_ndjson(&headers));
    respond(service, Variant::Site, req, stream).await
}

async fn handle_librarian(
    State(service): State<Arc<ChatService>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let stream = req.stream.unwrap_or(true);
    respond(service, Variant::Librarian, req, stream).await
}

async fn respond(
    service: Arc<ChatService>,
    variant: Variant,
    req: ChatRequest,
    stream: bool,
) -> Result<Response, AppError> {
    let (question, history) = req.into_parts();

    if stream {
        let rx = service.ask_stream(variant, &question, history)?;
        return Ok(ndjson_response(rx));
    }

    let answer = service.ask(variant, &question, &history).await?;
    Ok(Json(ChatChunk::single_shot(&answer)).into_response())
}

/// Stream chunks as NDJSON. The body ends when the sender side closes;
/// a disconnected client drops the receiver, which stops the producer.
fn ndjson_response(rx: mpsc::Receiver<ChatChunk>) -> Response {
    let lines = futures::stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<_, Infallible>(chunk.to_line()), rx))
    });

    (
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}
