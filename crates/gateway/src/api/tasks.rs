//! Task endpoints.
//!
//! - `POST /task/stream` — submit a task, stream its run as events.
//!   The first frame is always SESSION_CREATED; a `session_id` referencing
//!   a finished session starts a followup run.
//! - `GET /task/:id/stream` — one STATE_SNAPSHOT event, then close.
//! - `GET /task/:id/state` — one-shot JSON state.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use serde::Deserialize;
use std::time::Duration;

use sg_domain::event::{EventEnvelope, SwarmEvent};
use sg_domain::model::SessionMode;

use super::{api_error, stream_headers};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    /// Extra client context injected into planning.
    #[serde(default)]
    pub context: Option<String>,
}

pub async fn task_stream(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    axum::Json(body): axum::Json<TaskRequest>,
) -> impl IntoResponse {
    if body.task.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "task must not be empty");
    }
    if state.llm.is_empty() {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "no LLM provider configured");
    }

    let user_id = state.auth.resolve(&headers);
    let mode = body.mode.unwrap_or_default();

    // Resolve or create the session.
    let session_id = match &body.session_id {
        Some(existing) => {
            if state.sessions.get_session(existing).is_none() {
                return api_error(StatusCode::NOT_FOUND, "session not found");
            }
            existing.clone()
        }
        None => {
            let provider = body
                .provider
                .clone()
                .unwrap_or_else(|| state.config.llm.provider.clone());
            match state
                .sessions
                .create_session(
                    Some(body.task.clone()),
                    &provider,
                    body.model.clone(),
                    user_id,
                    mode,
                )
                .await
            {
                Ok(info) => info.session_id,
                Err(e) => return api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            }
        }
    };

    // Subscribe before anything is emitted so this stream sees the whole
    // run from SESSION_CREATED on.
    let rx = state.sessions.subscribe(&session_id);
    state.sessions.broadcast(
        &session_id,
        SwarmEvent::SessionCreated {
            session_id: session_id.clone(),
        }
        .into_envelope(),
    );

    if let Err(e) = state
        .sessions
        .submit_task(&session_id, body.task.clone(), body.context.clone())
    {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let stream = run_event_stream(rx);
    (
        stream_headers(),
        Sse::new(stream).keep_alive(keep_alive()),
    )
        .into_response()
}

/// Stream events until the run ends (RUN_FINISHED / RUN_ERROR).
fn run_event_stream(
    mut rx: tokio::sync::mpsc::Receiver<EventEnvelope>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(envelope) = rx.recv().await {
            let terminal = matches!(
                envelope.event,
                SwarmEvent::RunFinished { .. } | SwarmEvent::RunError { .. }
            );
            yield Ok(envelope_to_sse(&envelope));
            if terminal {
                break;
            }
        }
    }
}

pub(crate) fn envelope_to_sse(envelope: &EventEnvelope) -> Event {
    Event::default()
        .event(envelope.event.event_name())
        .data(serde_json::to_string(envelope).unwrap_or_else(|_| "{}".into()))
}

pub(crate) fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("heartbeat")
}

pub async fn task_snapshot_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(snapshot) = build_snapshot(&state, &session_id) else {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    };

    let envelope = SwarmEvent::StateSnapshot { snapshot }.into_envelope();
    let stream = futures_util::stream::once(async move {
        Ok::<_, std::convert::Infallible>(envelope_to_sse(&envelope))
    });
    (
        stream_headers(),
        Sse::new(stream).keep_alive(keep_alive()),
    )
        .into_response()
}

pub async fn task_state(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match build_snapshot(&state, &session_id) {
        Some(snapshot) => axum::Json(snapshot).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "session not found"),
    }
}

/// Combined session + orchestrator snapshot.
pub(crate) fn build_snapshot(state: &AppState, session_id: &str) -> Option<serde_json::Value> {
    let info = state.sessions.get_session(session_id)?;
    let live = state
        .sessions
        .get_orchestrator(session_id)
        .map(|o| o.live_state())
        .unwrap_or(serde_json::Value::Null);
    Some(serde_json::json!({
        "session": info,
        "live": live,
    }))
}
