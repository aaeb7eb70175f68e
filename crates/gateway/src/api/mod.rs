//! HTTP surface: task streams, session directory, relay reads,
//! interventions, and ops endpoints. Request/response bodies are JSON;
//! streaming endpoints speak the line-oriented event framing.

pub mod admin;
pub mod interventions;
pub mod relay;
pub mod sessions;
pub mod tasks;

use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Task execution
        .route("/task/stream", post(tasks::task_stream))
        .route("/task/:session_id/stream", get(tasks::task_snapshot_stream))
        .route("/task/:session_id/state", get(tasks::task_state))
        // Session directory
        .route("/sessions", get(sessions::list_sessions))
        .route("/session/:id", get(sessions::get_session))
        .route("/session/:id", delete(sessions::delete_session))
        .route("/session/:id/agents", get(sessions::get_agents))
        .route("/session/:id/relay-history", get(sessions::get_relay_history))
        .route("/session/:id/interventions", get(sessions::get_interventions))
        .route("/session/:id/live-state", get(sessions::get_live_state))
        .route("/session/:id/subscribe", get(sessions::subscribe))
        .route("/session/:id/subscribers", get(sessions::get_subscribers))
        // Interventions
        .route("/intervention", post(interventions::apply))
        .route("/intervention/broadcast", post(interventions::broadcast))
        // Relay reads
        .route("/relay/:session_id/history", get(relay::history))
        .route("/relay/:session_id/message/:message_id", get(relay::message))
        .route("/relay/:session_id/interventions", get(relay::interventions))
        // Ops
        .route("/health", get(admin::health))
        .route("/stats", get(admin::stats))
        .route("/subscribers/stats", get(admin::subscriber_stats))
}

/// Standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Response headers every event stream carries.
pub(crate) fn stream_headers() -> [(HeaderName, &'static str); 2] {
    [
        (HeaderName::from_static("x-accel-buffering"), "no"),
        (HeaderName::from_static("connection"), "keep-alive"),
    ]
}
