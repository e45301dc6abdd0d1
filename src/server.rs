//! HTTP chat transport.
//!
//! Stands in for a chat platform: each conversation is addressed by its
//! integer id, and every message gets exactly one text reply.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/conversations/{id}/messages` | Send `{"text": ...}`, receive `{"text": ...}` |
//! | `POST` | `/conversations/{id}/start` | Greeting text |
//! | `POST` | `/conversations/{id}/clear` | Reset the conversation's history |
//! | `GET`  | `/conversations/{id}/transcript` | Stored transcript, flat and as turns |
//! | `GET`  | `/index` | Status of the loaded index |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! A message without a `text` field, or with only whitespace, is answered
//! with the configured empty-query prompt. Model and storage failures are
//! answered with the generic failure text; details go to the log only.
//!
//! Errors from the non-message endpoints use the body
//! `{ "error": { "code": "internal", "message": "..." } }`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::models::Turn;
use crate::pipeline::Pipeline;
use crate::transcript::parse_turns;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Build the pipeline, warm the index, and serve until shutdown.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);

    let index = pipeline.index().get_or_rebuild().await?;
    tracing::info!(passages = index.len(), "index ready");

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "chat server listening");
    println!("docqa listening on http://{}", config.server.bind);

    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

/// Routes for `pipeline`, with permissive CORS and request tracing.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/conversations/{id}/messages", post(handle_message))
        .route("/conversations/{id}/start", post(handle_start))
        .route("/conversations/{id}/clear", post(handle_clear))
        .route("/conversations/{id}/transcript", get(handle_transcript))
        .route("/index", get(handle_index_status))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { pipeline })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// A 500 carrying user-safe text; the cause is logged, not returned.
fn internal(message: impl Into<String>, cause: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", cause), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ Conversations ============

#[derive(Deserialize)]
struct MessageRequest {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

async fn handle_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MessageRequest>,
) -> Json<TextResponse> {
    let text = req.text.unwrap_or_default();
    let reply = state.pipeline.reply(id, &text).await;
    Json(TextResponse { text: reply })
}

async fn handle_start(State(state): State<AppState>) -> Json<TextResponse> {
    Json(TextResponse {
        text: state.pipeline.messages().greeting.clone(),
    })
}

async fn handle_clear(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TextResponse>, AppError> {
    let messages = state.pipeline.messages();
    state
        .pipeline
        .clear(id)
        .await
        .map_err(|e| internal(messages.failure.clone(), e))?;
    Ok(Json(TextResponse {
        text: messages.cleared.clone(),
    }))
}

#[derive(Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub conversation_id: i64,
    pub transcript: String,
    pub turns: Vec<Turn>,
}

async fn handle_transcript(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TranscriptResponse>, AppError> {
    let transcript = state
        .pipeline
        .transcript(id)
        .await
        .map_err(|e| internal(state.pipeline.messages().failure.clone(), e))?;
    Ok(Json(TranscriptResponse {
        conversation_id: id,
        turns: parse_turns(&transcript),
        transcript,
    }))
}

// ============ GET /index ============

#[derive(Serialize)]
struct IndexStatusResponse {
    loaded: bool,
    fingerprint: Option<String>,
    model: Option<String>,
    passages: usize,
    built_at: Option<i64>,
    rebuilds: u64,
}

async fn handle_index_status(State(state): State<AppState>) -> Json<IndexStatusResponse> {
    let index = state.pipeline.index();
    let response = match index.status().await {
        Some(s) => IndexStatusResponse {
            loaded: true,
            fingerprint: Some(s.fingerprint),
            model: Some(s.model),
            passages: s.passages,
            built_at: Some(s.built_at),
            rebuilds: s.rebuilds,
        },
        None => IndexStatusResponse {
            loaded: false,
            fingerprint: None,
            model: None,
            passages: 0,
            built_at: None,
            rebuilds: index.rebuild_count(),
        },
    };
    Json(response)
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
