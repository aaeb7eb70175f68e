//! Relay read endpoints: session message history, single-message lookup,
//! and intervention-message queries. Live coordinator state is preferred;
//! finished sessions fall back to the durable record.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use super::api_error;
use crate::state::AppState;

pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Some(master) = live_master(&state, &session_id) {
        let history = master.relay().message_history();
        return Json(serde_json::json!({
            "session_id": session_id,
            "count": history.len(),
            "messages": history,
        }))
        .into_response();
    }

    if !state.sessions.session_exists(&session_id).await {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    }
    match state.repository.list_relay_messages(&session_id).await {
        Ok(messages) => Json(serde_json::json!({
            "session_id": session_id,
            "count": messages.len(),
            "messages": messages,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn message(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Response {
    if let Some(master) = live_master(&state, &session_id) {
        if let Some(message) = master.relay().get_message(&message_id) {
            return Json(serde_json::json!(message)).into_response();
        }
    }

    match state.repository.list_relay_messages(&session_id).await {
        Ok(messages) => match messages.into_iter().find(|m| m.message_id == message_id) {
            Some(record) => Json(serde_json::json!(record)).into_response(),
            None => api_error(StatusCode::NOT_FOUND, "relay message not found"),
        },
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn interventions(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Some(master) = live_master(&state, &session_id) {
        let history = master.relay().intervention_history();
        let messages = master.relay().intervention_messages(None);
        return Json(serde_json::json!({
            "session_id": session_id,
            "count": history.len(),
            "interventions": history,
            "messages": messages,
        }))
        .into_response();
    }

    if !state.sessions.session_exists(&session_id).await {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    }
    match state.repository.list_interventions(&session_id).await {
        Ok(records) => Json(serde_json::json!({
            "session_id": session_id,
            "count": records.len(),
            "interventions": records,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn live_master(
    state: &AppState,
    session_id: &str,
) -> Option<std::sync::Arc<crate::runtime::MasterOrchestrator>> {
    state
        .sessions
        .get_orchestrator(session_id)
        .and_then(|o| o.as_master())
}
