//! Human intervention endpoints.
//!
//! - `POST /intervention` — apply a directive to one, several, or all
//!   workers of a session.
//! - `POST /intervention/broadcast` — convenience broadcast-to-all.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use sg_domain::model::{Intervention, InterventionKind, InterventionScope};

use super::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InterventionRequest {
    pub session_id: String,
    pub intervention_type: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_ids: Option<Vec<String>>,
    #[serde(default)]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub scope: Option<InterventionScope>,
    #[serde(default = "default_true")]
    pub broadcast_to_relay: bool,
}

fn default_priority() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

pub async fn apply(
    State(state): State<AppState>,
    Json(body): Json<InterventionRequest>,
) -> impl IntoResponse {
    // Validate the type before touching the session.
    let payload = body.payload.clone().unwrap_or_default();
    let kind = match body.intervention_type.as_str() {
        "pause" => InterventionKind::Pause,
        "resume" => InterventionKind::Resume,
        "cancel" => InterventionKind::Cancel,
        "inject" => {
            if !payload.contains_key("information") {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "inject intervention requires payload.information",
                );
            }
            InterventionKind::Inject
        }
        "adjust" => {
            if !payload.contains_key("adjustments") {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "adjust intervention requires payload.adjustments",
                );
            }
            if body.agent_id.is_none() {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "adjust intervention requires agent_id",
                );
            }
            InterventionKind::Adjust
        }
        "broadcast" => {
            // Broadcast is inject-to-all with a required message payload.
            let Some(message) = payload.get("message").and_then(|v| v.as_str()) else {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "broadcast intervention requires payload.message",
                );
            };
            return broadcast_inner(
                &state,
                &body.session_id,
                message,
                body.reason.as_deref().unwrap_or(""),
                body.priority,
                body.scope == Some(InterventionScope::All),
            )
            .await;
        }
        other => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown intervention type: {other}"),
            )
        }
    };

    let master = match resolve_master(&state, &body.session_id).await {
        Ok(master) => master,
        Err(response) => return response,
    };

    // Scope defaults: explicit > single target > selected list > broadcast.
    let scope = body.scope.unwrap_or(if body.agent_id.is_some() {
        InterventionScope::Single
    } else if body.agent_ids.is_some() {
        InterventionScope::Selected
    } else {
        InterventionScope::Broadcast
    });

    let mut intervention = Intervention::new(kind, scope, body.priority);
    intervention.target_worker_id = body.agent_id.clone();
    intervention.target_worker_ids = body.agent_ids.clone().unwrap_or_default();
    intervention.payload = payload;
    intervention.reason = body.reason.clone().unwrap_or_default();
    intervention.broadcast_to_relay = body.broadcast_to_relay;

    if scope == InterventionScope::Single {
        let Some(target) = &intervention.target_worker_id else {
            return api_error(StatusCode::BAD_REQUEST, "single scope requires agent_id");
        };
        if !master.has_worker(target) {
            return api_error(
                StatusCode::NOT_FOUND,
                format!("Cannot apply intervention: agent {target} not found"),
            );
        }
    }

    state
        .sessions
        .record_intervention(&body.session_id, &intervention)
        .await;
    state.sessions.touch(&body.session_id);

    let message = master.apply_intervention(intervention.clone());

    Json(serde_json::json!({
        "success": true,
        "intervention_id": intervention.id,
        "messages": message.into_iter().collect::<Vec<_>>(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_broadcast_priority")]
    pub priority: u8,
    #[serde(default)]
    pub force_action: bool,
}

fn default_broadcast_priority() -> u8 {
    7
}

pub async fn broadcast(
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequest>,
) -> impl IntoResponse {
    broadcast_inner(
        &state,
        &body.session_id,
        &body.message,
        body.reason.as_deref().unwrap_or(""),
        body.priority,
        body.force_action,
    )
    .await
}

async fn broadcast_inner(
    state: &AppState,
    session_id: &str,
    message: &str,
    reason: &str,
    priority: u8,
    force_action: bool,
) -> axum::response::Response {
    let master = match resolve_master(state, session_id).await {
        Ok(master) => master,
        Err(response) => return response,
    };

    let Some(relay_message) = master.broadcast_all(message, reason, priority, force_action) else {
        return api_error(
            StatusCode::BAD_REQUEST,
            "no active workers to broadcast to",
        );
    };

    // Mirror the durable record the scoped path writes.
    let scope = if force_action {
        InterventionScope::All
    } else {
        InterventionScope::Broadcast
    };
    let record = Intervention::new(InterventionKind::Inject, scope, priority)
        .with_payload("information", serde_json::json!(message))
        .with_reason(reason);
    state.sessions.record_intervention(session_id, &record).await;
    state.sessions.touch(session_id);

    Json(serde_json::json!({
        "success": true,
        "messages": [relay_message],
    }))
    .into_response()
}

async fn resolve_master(
    state: &AppState,
    session_id: &str,
) -> Result<std::sync::Arc<crate::runtime::MasterOrchestrator>, axum::response::Response> {
    if !state.sessions.session_exists(session_id).await {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "Cannot apply intervention: session not found",
        ));
    }
    state
        .sessions
        .get_orchestrator(session_id)
        .and_then(|o| o.as_master())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "Cannot apply intervention: session has no active swarm run",
            )
        })
}
