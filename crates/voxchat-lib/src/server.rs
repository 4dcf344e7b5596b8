//! HTTP chat API.
//!
//! `POST /api/chat` turns `{api_key, prompt, history}` into a single upstream
//! model call and answers `{response}` or `{error}`. CORS-permissive so a
//! browser client on another port can call it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use voxchat_core::types::{ChatReply, ChatRequest};

use crate::gemini::{build_prompt, Generator};

/// Build the axum router around a shared [`Generator`].
pub fn router(generator: Arc<dyn Generator>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(generator)
}

#[derive(serde::Serialize)]
struct OkResponse {
    ok: bool,
}

async fn health() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

async fn chat(
    State(generator): State<Arc<dyn Generator>>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ChatReply>) {
    if req.api_key.is_empty() || req.prompt.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ChatReply::failure("API key and prompt are required")),
        );
    }

    info!("chat: prompt {} chars, {} history turns", req.prompt.len(), req.history.len());
    let prompt = build_prompt(&req.history, &req.prompt);

    match generator.generate(&req.api_key, &prompt).await {
        Ok(text) => (StatusCode::OK, Json(ChatReply::success(text))),
        Err(e) => {
            warn!("chat: upstream failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ChatReply::failure(e.to_string())),
            )
        }
    }
}
