//! In-memory repository: the default sink for tests and single-process
//! deployments.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use parking_lot::RwLock;

use sg_domain::error::Result;
use sg_domain::model::SessionStatus;

use crate::records::{
    AgentRecord, InterventionRecord, MessageRecord, RelayMessageRecord, SessionRecord,
    SessionUpdate, StationRecord,
};
use crate::repository::Repository;

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, SessionRecord>,
    /// Insertion order of session ids, newest last (list is newest-first).
    session_order: Vec<String>,
    agents: HashMap<String, Vec<AgentRecord>>,
    stations: HashMap<String, Vec<StationRecord>>,
    relay_messages: HashMap<String, Vec<RelayMessageRecord>>,
    interventions: HashMap<String, Vec<InterventionRecord>>,
    messages: HashMap<String, Vec<MessageRecord>>,
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    async fn create_session(&self, record: SessionRecord) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.sessions.contains_key(&record.session_id) {
            tables.session_order.push(record.session_id.clone());
        }
        tables.sessions.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.tables.read().sessions.get(session_id).cloned())
    }

    async fn update_session(&self, session_id: &str, update: SessionUpdate) -> Result<bool> {
        let mut tables = self.tables.write();
        let Some(record) = tables.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(report) = update.final_report {
            record.final_report = Some(report);
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        if let Some(plan) = update.plan_json {
            record.plan_json = Some(plan);
        }
        if let Some(active) = update.last_active_at {
            record.last_active_at = active;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let mut tables = self.tables.write();
        let existed = tables.sessions.remove(session_id).is_some();
        tables.session_order.retain(|id| id != session_id);
        tables.agents.remove(session_id);
        tables.stations.remove(session_id);
        tables.relay_messages.remove(session_id);
        tables.interventions.remove(session_id);
        tables.messages.remove(session_id);
        Ok(existed)
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<SessionRecord>, usize)> {
        let tables = self.tables.read();
        let matches: Vec<&SessionRecord> = tables
            .session_order
            .iter()
            .rev()
            .filter_map(|id| tables.sessions.get(id))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| user_id.map_or(true, |u| r.user_id.as_deref() == Some(u)))
            .collect();
        let total = matches.len();
        let page = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn count_sessions(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<usize> {
        let (_, total) = self.list_sessions(status, user_id, 0, 0).await?;
        Ok(total)
    }

    async fn expire_idle_sessions(&self, timeout_minutes: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::minutes(timeout_minutes);
        let mut tables = self.tables.write();
        let mut changed = 0;
        for record in tables.sessions.values_mut() {
            if record.status == SessionStatus::Active && record.last_active_at < cutoff {
                record.status = SessionStatus::Expired;
                record.updated_at = Utc::now();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn upsert_agent(&self, record: AgentRecord) -> Result<()> {
        let mut tables = self.tables.write();
        let agents = tables.agents.entry(record.session_id.clone()).or_default();
        match agents.iter_mut().find(|a| a.agent_id == record.agent_id) {
            Some(existing) => *existing = record,
            None => agents.push(record),
        }
        Ok(())
    }

    async fn list_agents(&self, session_id: &str) -> Result<Vec<AgentRecord>> {
        Ok(self
            .tables
            .read()
            .agents
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_station(&self, record: StationRecord) -> Result<()> {
        let mut tables = self.tables.write();
        let stations = tables
            .stations
            .entry(record.session_id.clone())
            .or_default();
        match stations
            .iter_mut()
            .find(|s| s.station_id == record.station_id)
        {
            Some(existing) => *existing = record,
            None => stations.push(record),
        }
        Ok(())
    }

    async fn list_stations(&self, session_id: &str) -> Result<Vec<StationRecord>> {
        Ok(self
            .tables
            .read()
            .stations
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_relay_message(&self, record: RelayMessageRecord) -> Result<()> {
        self.tables
            .write()
            .relay_messages
            .entry(record.session_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list_relay_messages(&self, session_id: &str) -> Result<Vec<RelayMessageRecord>> {
        Ok(self
            .tables
            .read()
            .relay_messages
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_intervention(&self, record: InterventionRecord) -> Result<()> {
        self.tables
            .write()
            .interventions
            .entry(record.session_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list_interventions(&self, session_id: &str) -> Result<Vec<InterventionRecord>> {
        Ok(self
            .tables
            .read()
            .interventions
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_message(&self, record: MessageRecord) -> Result<()> {
        let mut tables = self.tables.write();
        let messages = tables
            .messages
            .entry(record.session_id.clone())
            .or_default();
        if !messages.iter().any(|m| m.message_id == record.message_id) {
            messages.push(record);
        }
        Ok(())
    }

    async fn append_message_delta(
        &self,
        session_id: &str,
        message_id: &str,
        delta: &str,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let messages = tables.messages.entry(session_id.to_string()).or_default();
        match messages.iter_mut().find(|m| m.message_id == message_id) {
            Some(message) => {
                message.content.push_str(delta);
                message.updated_at = Utc::now();
            }
            None => {
                // Delta arrived before the start record: create the row.
                messages.push(MessageRecord {
                    message_id: message_id.to_string(),
                    session_id: session_id.to_string(),
                    role: "assistant".into(),
                    content: delta.to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        Ok(self
            .tables
            .read()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_domain::model::SessionMode;

    fn session(id: &str, user: Option<&str>) -> SessionRecord {
        SessionRecord {
            session_id: id.into(),
            task: "分析任务".into(),
            status: SessionStatus::Active,
            provider: "openai".into(),
            model: None,
            mode: SessionMode::Emergent,
            user_id: user.map(String::from),
            plan_json: None,
            final_report: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_active_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn session_crud() {
        let repo = MemoryRepository::new();
        repo.create_session(session("s1", None)).await.unwrap();

        let fetched = repo.get_session("s1").await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Active);

        let found = repo
            .update_session("s1", SessionUpdate::status(SessionStatus::Completed))
            .await
            .unwrap();
        assert!(found);
        let fetched = repo.get_session("s1").await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);

        assert!(repo.delete_session("s1").await.unwrap());
        assert!(repo.get_session("s1").await.unwrap().is_none());
        assert!(!repo.delete_session("s1").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_user_and_status() {
        let repo = MemoryRepository::new();
        repo.create_session(session("s1", Some("alice"))).await.unwrap();
        repo.create_session(session("s2", Some("bob"))).await.unwrap();
        repo.create_session(session("s3", Some("alice"))).await.unwrap();
        repo.update_session("s3", SessionUpdate::status(SessionStatus::Completed))
            .await
            .unwrap();

        let (page, total) = repo
            .list_sessions(None, Some("alice"), 10, 0)
            .await
            .unwrap();
        assert_eq!(total, 2);
        // Newest first.
        assert_eq!(page[0].session_id, "s3");

        let (page, total) = repo
            .list_sessions(Some(SessionStatus::Active), Some("alice"), 10, 0)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].session_id, "s1");
    }

    #[tokio::test]
    async fn expire_idle_sessions_marks_only_stale_active() {
        let repo = MemoryRepository::new();
        let mut stale = session("old", None);
        stale.last_active_at = Utc::now() - Duration::minutes(120);
        repo.create_session(stale).await.unwrap();
        repo.create_session(session("fresh", None)).await.unwrap();

        let changed = repo.expire_idle_sessions(60).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            repo.get_session("old").await.unwrap().unwrap().status,
            SessionStatus::Expired
        );
        assert_eq!(
            repo.get_session("fresh").await.unwrap().unwrap().status,
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn agent_upsert_replaces() {
        let repo = MemoryRepository::new();
        let record = AgentRecord {
            agent_id: "a1".into(),
            session_id: "s1".into(),
            name: "分析师".into(),
            role_name: "分析师".into(),
            status: sg_domain::model::WorkerStatus::Running,
            progress: 10.0,
            final_result: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.upsert_agent(record.clone()).await.unwrap();
        let mut updated = record;
        updated.progress = 80.0;
        repo.upsert_agent(updated).await.unwrap();

        let agents = repo.list_agents("s1").await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].progress, 80.0);
    }

    #[tokio::test]
    async fn message_delta_appends_and_creates() {
        let repo = MemoryRepository::new();
        repo.append_message_delta("s1", "m1", "你好").await.unwrap();
        repo.append_message_delta("s1", "m1", "世界").await.unwrap();
        let messages = repo.list_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "你好世界");
    }
}
