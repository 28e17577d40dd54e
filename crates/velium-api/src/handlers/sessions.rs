//! /sessions handlers — session listing, inspection and removal.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tokio::time::Instant;

use velium_services::Session;

use super::{parse_session_id, ApiState};

#[derive(Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub display_name: String,
    pub age_secs: u64,
    pub expires_in_secs: u64,
}

impl SessionInfo {
    fn from_session(session: &Session, now: Instant) -> Self {
        Self {
            session_id: session.id.to_string(),
            display_name: session.display_name.clone(),
            age_secs: now.saturating_duration_since(session.created_at).as_secs(),
            expires_in_secs: session.expires_at.saturating_duration_since(now).as_secs(),
        }
    }
}

// ── /sessions (GET) ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

pub async fn handle_session_list(State(state): State<ApiState>) -> Json<SessionListResponse> {
    let now = Instant::now();
    let sessions = state
        .gateway
        .sessions()
        .iter()
        .filter(|s| !s.is_expired(now))
        .map(|s| SessionInfo::from_session(s, now))
        .collect();

    Json(SessionListResponse { sessions })
}

// ── /sessions/:id (GET) ───────────────────────────────────────────────────────

pub async fn handle_session_inspect(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, (StatusCode, String)> {
    let id = parse_session_id(&session_id)?;

    let session = state
        .gateway
        .session_get(&id)
        .ok_or((StatusCode::NOT_FOUND, "session not found".to_string()))?;

    Ok(Json(SessionInfo::from_session(&session, Instant::now())))
}

// ── /sessions/:id (DELETE) ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionDropResponse {
    pub session_id: String,
    pub removed: bool,
}

pub async fn handle_session_drop(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDropResponse>, (StatusCode, String)> {
    let id = parse_session_id(&session_id)?;
    let removed = state.gateway.session_remove(&id);

    if removed {
        tracing::info!(session_id = %id, "session removed via API");
    }

    Ok(Json(SessionDropResponse {
        session_id: id.to_string(),
        removed,
    }))
}
