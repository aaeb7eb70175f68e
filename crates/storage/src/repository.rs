use sg_domain::error::Result;
use sg_domain::model::SessionStatus;

use crate::records::{
    AgentRecord, InterventionRecord, MessageRecord, RelayMessageRecord, SessionRecord,
    SessionUpdate, StationRecord,
};

/// Append-mostly persistence surface.
///
/// Implementations must be safe to call concurrently from the session
/// pump and HTTP handlers.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    // ── Sessions ──────────────────────────────────────────────────
    async fn create_session(&self, record: SessionRecord) -> Result<()>;
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;
    async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Result<bool>;
    async fn delete_session(&self, session_id: &str) -> Result<bool>;
    /// Newest-first page plus the total match count.
    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<SessionRecord>, usize)>;
    async fn count_sessions(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<usize>;
    /// Mark sessions idle beyond `timeout_minutes` as expired; returns the
    /// number of rows changed.
    async fn expire_idle_sessions(&self, timeout_minutes: i64) -> Result<usize>;

    // ── Agents ────────────────────────────────────────────────────
    async fn upsert_agent(&self, record: AgentRecord) -> Result<()>;
    async fn list_agents(&self, session_id: &str) -> Result<Vec<AgentRecord>>;

    // ── Stations ──────────────────────────────────────────────────
    async fn upsert_station(&self, record: StationRecord) -> Result<()>;
    async fn list_stations(&self, session_id: &str) -> Result<Vec<StationRecord>>;

    // ── Relay messages ────────────────────────────────────────────
    async fn create_relay_message(&self, record: RelayMessageRecord) -> Result<()>;
    async fn list_relay_messages(&self, session_id: &str) -> Result<Vec<RelayMessageRecord>>;

    // ── Interventions ─────────────────────────────────────────────
    async fn create_intervention(&self, record: InterventionRecord) -> Result<()>;
    async fn list_interventions(&self, session_id: &str) -> Result<Vec<InterventionRecord>>;

    // ── Streamed messages ─────────────────────────────────────────
    async fn create_message(&self, record: MessageRecord) -> Result<()>;
    /// Append a content delta to a streamed message; creates the row when
    /// the delta arrives before the start record.
    async fn append_message_delta(
        &self,
        session_id: &str,
        message_id: &str,
        delta: &str,
    ) -> Result<()>;
    async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>>;
}
