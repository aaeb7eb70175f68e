//! Ops endpoints: health probe and runtime statistics.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use sg_domain::model::SessionStatus;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "providers": state.llm.ids(),
        "skills": state.skills.list_names(),
    }))
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let mut stats = state.sessions.stats();

    // Durable directory counts; the in-memory view stays useful even if
    // the repository read fails.
    if let Ok(total) = state.repository.count_sessions(None, None).await {
        stats["db_total_sessions"] = serde_json::json!(total);
    }
    if let Ok(active) = state
        .repository
        .count_sessions(Some(SessionStatus::Active), None)
        .await
    {
        stats["db_active_sessions"] = serde_json::json!(active);
    }
    if let Ok(completed) = state
        .repository
        .count_sessions(Some(SessionStatus::Completed), None)
        .await
    {
        stats["db_completed_sessions"] = serde_json::json!(completed);
    }

    Json(stats)
}

pub async fn subscriber_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.sessions.subscriber_stats();
    let total: usize = stats.values().sum();
    Json(serde_json::json!({
        "sessions": stats,
        "total_subscribers": total,
    }))
}
