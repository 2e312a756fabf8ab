//! Health check endpoint.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::web::state::SharedState;

pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.lock().await;
    let body = serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.len(),
        "subscribers": state.backend.feed().subscriber_count(),
        "ws_connections": state.ws_connection_count.load(Ordering::Relaxed),
        "pending_timeout_secs": state.pending_timeout.as_secs(),
    });
    (StatusCode::OK, axum::Json(body))
}
