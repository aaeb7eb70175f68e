//! Session directory endpoints: listing, detail reads, the subscribe
//! stream, and teardown.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use std::time::Duration;

use sg_domain::event::SwarmEvent;
use sg_domain::model::SessionStatus;

use super::tasks::{build_snapshot, envelope_to_sse, keep_alive};
use super::{api_error, stream_headers};
use crate::state::AppState;

/// Inactivity window after which the subscribe stream emits a HEARTBEAT
/// event.
const SUBSCRIBER_HEARTBEAT: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    /// "memory" (default) or "db".
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

fn parse_status(s: &str) -> Option<SessionStatus> {
    match s {
        "active" => Some(SessionStatus::Active),
        "completed" => Some(SessionStatus::Completed),
        "expired" => Some(SessionStatus::Expired),
        "error" => Some(SessionStatus::Error),
        _ => None,
    }
}

/// Directory listing, scoped to the authenticated user. Unauthenticated
/// callers get an empty list.
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let Some(user_id) = state.auth.resolve(&headers) else {
        return Json(serde_json::json!({ "sessions": [], "total": 0 })).into_response();
    };

    let status = query.status.as_deref().and_then(parse_status);
    let limit = query.limit.min(200);

    if query.source.as_deref() == Some("db") {
        match state
            .repository
            .list_sessions(status, Some(&user_id), limit, query.offset)
            .await
        {
            Ok((records, total)) => Json(serde_json::json!({
                "sessions": records,
                "total": total,
                "limit": limit,
                "offset": query.offset,
            }))
            .into_response(),
            Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    } else {
        let sessions: Vec<_> = state
            .sessions
            .list_sessions(Some(&user_id))
            .into_iter()
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .skip(query.offset)
            .take(limit)
            .collect();
        let total = sessions.len();
        Json(serde_json::json!({
            "sessions": sessions,
            "total": total,
            "limit": limit,
            "offset": query.offset,
        }))
        .into_response()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Detail reads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if let Some(info) = state.sessions.get_session(&session_id) {
        return Json(serde_json::json!(info)).into_response();
    }
    // Fall back to the durable directory.
    match state.repository.get_session(&session_id).await {
        Ok(Some(record)) => Json(serde_json::json!(record)).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn get_agents(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if !state.sessions.session_exists(&session_id).await {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    }
    match state.repository.list_agents(&session_id).await {
        Ok(agents) => Json(serde_json::json!({
            "session_id": session_id,
            "agents": agents,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn get_relay_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    super::relay::history(State(state), Path(session_id)).await
}

pub async fn get_interventions(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    super::relay::interventions(State(state), Path(session_id)).await
}

pub async fn get_live_state(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match build_snapshot(&state, &session_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "session not found"),
    }
}

pub async fn get_subscribers(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "session_id": session_id,
        "subscriber_count": state.sessions.subscriber_count(&session_id),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /session/:id/subscribe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Subscribe stream: a STATE_SNAPSHOT first, then every event for the
/// session. A HEARTBEAT event covers 30 s silences on top of the
/// transport-level comment keep-alives.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    // 404 only after checking memory AND the durable directory.
    if !state.sessions.session_exists(&session_id).await {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    }

    let snapshot = build_snapshot(&state, &session_id)
        .unwrap_or_else(|| serde_json::json!({ "session_id": session_id }));
    let mut rx = state.sessions.subscribe(&session_id);

    let stream = async_stream::stream! {
        yield Ok::<_, std::convert::Infallible>(envelope_to_sse(
            &SwarmEvent::StateSnapshot { snapshot }.into_envelope(),
        ));

        loop {
            match tokio::time::timeout(SUBSCRIBER_HEARTBEAT, rx.recv()).await {
                Ok(Some(envelope)) => yield Ok(envelope_to_sse(&envelope)),
                Ok(None) => break,
                Err(_) => {
                    yield Ok(envelope_to_sse(&SwarmEvent::Heartbeat.into_envelope()));
                }
            }
        }
    };

    (
        stream_headers(),
        Sse::new(stream).keep_alive(keep_alive()),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /session/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if !state.sessions.session_exists(&session_id).await {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    }
    let deleted = state.sessions.delete_session(&session_id).await;
    Json(serde_json::json!({
        "session_id": session_id,
        "deleted": deleted,
    }))
    .into_response()
}
