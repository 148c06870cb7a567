//! Admin API handlers: liveness and read-only session inspection.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    domain::SessionId,
    infrastructure::dto::http::{SessionDto, SessionListDto},
    ui::state::AppState,
};

/// Liveness probe
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// List connected sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionListDto> {
    let sessions = state.registry.sessions().await;

    // Domain Model から DTO への変換
    Json(SessionListDto::from(sessions))
}

/// Get one session by id
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDto>, StatusCode> {
    let id: SessionId = session_id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    match state.registry.session(id).await {
        Some(session) => Ok(Json(SessionDto::from(&session))),
        None => Err(StatusCode::NOT_FOUND),
    }
}
