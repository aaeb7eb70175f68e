use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sg_domain::model::{
    InterventionKind, InterventionScope, RelayKind, SessionMode, SessionStatus, WorkerStatus,
};

/// A session's durable row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub task: String,
    pub status: SessionStatus,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_json: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Partial update applied to a session row.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub final_report: Option<String>,
    pub error: Option<String>,
    pub plan_json: Option<serde_json::Value>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub session_id: String,
    pub name: String,
    pub role_name: String,
    pub status: WorkerStatus,
    pub progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationRecord {
    pub station_id: String,
    pub session_id: String,
    pub name: String,
    pub phase: u32,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessageRecord {
    pub message_id: String,
    pub session_id: String,
    pub station_id: String,
    pub kind: RelayKind,
    pub source_worker_id: String,
    pub source_worker_name: String,
    pub target_worker_ids: Vec<String>,
    pub content: String,
    pub importance: f32,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub intervention_id: String,
    pub session_id: String,
    pub kind: InterventionKind,
    pub scope: InterventionScope,
    pub payload: serde_json::Value,
    pub reason: String,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
}

/// A streamed message row. Content grows through delta appends while the
/// stream is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
