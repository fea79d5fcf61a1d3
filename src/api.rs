//! HTTP control API for the reader.
//!
//! Local-only transport surface: status, play/pause/resume/stop, shuffle and
//! the text/topic setters. Runs on port 8768 (configurable) using axum.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::player::{Player, PlayerStatus};

#[derive(Clone)]
pub struct ApiState {
    pub player: Arc<Player>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct TextRequest {
    text: String,
}

#[derive(Deserialize)]
struct TopicRequest {
    topic: String,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
        }
    }
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/image", get(handle_image))
        .route("/play", post(handle_play))
        .route("/pause", post(handle_pause))
        .route("/resume", post(handle_resume))
        .route("/stop", post(handle_stop))
        .route("/shuffle", post(handle_shuffle))
        .route("/text", post(handle_text))
        .route("/topic", post(handle_topic))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<PlayerStatus> {
    Json(state.player.status())
}

async fn handle_image(State(state): State<ApiState>) -> Response {
    match state.player.current_image_bytes() {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_play(State(state): State<ApiState>) -> Json<SimpleResponse> {
    info!("HTTP /play");
    // Fire-and-forget: play may first wait on an image search
    let player = state.player.clone();
    tokio::spawn(async move { player.play().await });
    Json(SimpleResponse::ok("playing"))
}

async fn handle_pause(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.player.pause();
    Json(SimpleResponse::ok("paused"))
}

async fn handle_resume(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.player.resume();
    Json(SimpleResponse::ok("resumed"))
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.player.stop();
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_shuffle(State(state): State<ApiState>) -> Json<SimpleResponse> {
    let player = state.player.clone();
    tokio::spawn(async move { player.shuffle().await });
    Json(SimpleResponse::ok("shuffling"))
}

async fn handle_text(
    State(state): State<ApiState>,
    Json(req): Json<TextRequest>,
) -> Json<SimpleResponse> {
    let preview: String = req.text.chars().take(80).collect();
    info!(
        "HTTP /text: \"{}{}\" ({} chars)",
        preview.replace('\n', " "),
        if req.text.chars().count() > 80 { "..." } else { "" },
        req.text.chars().count(),
    );
    state.player.set_text(req.text);
    Json(SimpleResponse::ok("ok"))
}

async fn handle_topic(
    State(state): State<ApiState>,
    Json(req): Json<TopicRequest>,
) -> Json<SimpleResponse> {
    info!("HTTP /topic: \"{}\"", req.topic);
    state.player.set_topic(req.topic);
    Json(SimpleResponse::ok("ok"))
}
