//! Session manager — the process-scoped directory of live sessions.
//!
//! Owns the in-memory session records, the per-session orchestrator
//! instances, and the subscriber queues. Every orchestrator feeds one
//! pump task here, which persists critical events before fan-out so the
//! durable record never lags a client-visible status transition.
//!
//! Injected through `AppState`; nothing in this module is a global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use sg_domain::error::{Error, Result};
use sg_domain::event::{EventEnvelope, SwarmEvent};
use sg_domain::model::{
    FollowupSnapshot, Intervention, RelayMessage, SessionMode, SessionStatus, TaskHistoryEntry,
    WorkerStatus, TASK_HISTORY_MAX_ROUNDS,
};
use sg_providers::ProviderRegistry;
use sg_skills::{SkillExecutor, SkillRegistry};
use sg_storage::{
    AgentRecord, InterventionRecord, MessageRecord, RelayMessageRecord, Repository, SessionRecord,
    SessionUpdate, StationRecord,
};

use super::direct::DirectAgent;
use super::master::MasterOrchestrator;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session info
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory session record. The durable twin lives in the repository.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub task: Option<String>,
    pub provider: String,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub plan_json: Option<serde_json::Value>,
    pub final_report: Option<String>,
    pub error: Option<String>,
    /// Carry-over for the next round on this session.
    pub snapshot: FollowupSnapshot,
}

impl SessionInfo {
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn is_expired(&self, timeout_minutes: i64) -> bool {
        Utc::now() - self.last_active_at > chrono::Duration::minutes(timeout_minutes)
    }

    /// Whether a new task on this session is a followup. Direct sessions
    /// qualify once finished (their history lives in the agent); emergent
    /// sessions additionally need a final report to carry over.
    pub fn has_history(&self) -> bool {
        if !matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Error | SessionStatus::Expired
        ) {
            return false;
        }
        match self.mode {
            SessionMode::Direct => true,
            SessionMode::Emergent => self.final_report.is_some(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub enum Orchestrator {
    Emergent(Arc<MasterOrchestrator>),
    Direct(Arc<DirectAgent>),
}

impl Orchestrator {
    pub fn as_master(&self) -> Option<Arc<MasterOrchestrator>> {
        match self {
            Self::Emergent(master) => Some(master.clone()),
            Self::Direct(_) => None,
        }
    }

    pub fn live_state(&self) -> serde_json::Value {
        match self {
            Self::Emergent(master) => master.live_state(),
            Self::Direct(direct) => direct.live_state(),
        }
    }

    pub fn extract_summary(&self) -> FollowupSnapshot {
        match self {
            Self::Emergent(master) => master.extract_summary(),
            Self::Direct(direct) => direct.extract_summary(),
        }
    }

    pub fn cleanup(&self) {
        match self {
            Self::Emergent(master) => master.cleanup(),
            Self::Direct(direct) => direct.cleanup(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub timeout_minutes: i64,
    pub max_sessions: usize,
    pub subscriber_capacity: usize,
    pub worker_max_iterations: u32,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 60,
            max_sessions: 100,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            worker_max_iterations: 10,
        }
    }
}

pub struct SessionManager {
    config: SessionManagerConfig,
    llm: Arc<ProviderRegistry>,
    skills: Arc<SkillRegistry>,
    executor: Arc<dyn SkillExecutor>,
    repository: Arc<dyn Repository>,
    sessions: Mutex<HashMap<String, SessionInfo>>,
    orchestrators: Mutex<HashMap<String, Orchestrator>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<EventEnvelope>>>>,
}

impl SessionManager {
    pub fn new(
        config: SessionManagerConfig,
        llm: Arc<ProviderRegistry>,
        skills: Arc<SkillRegistry>,
        executor: Arc<dyn SkillExecutor>,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            config,
            llm,
            skills,
            executor,
            repository,
            sessions: Mutex::new(HashMap::new()),
            orchestrators: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    // ── Session lifecycle ─────────────────────────────────────────

    pub async fn create_session(
        self: &Arc<Self>,
        task: Option<String>,
        provider: &str,
        model: Option<String>,
        user_id: Option<String>,
        mode: SessionMode,
    ) -> Result<SessionInfo> {
        if self.sessions.lock().len() >= self.config.max_sessions {
            self.cleanup_expired().await;
            if self.sessions.lock().len() >= self.config.max_sessions {
                return Err(Error::Other(format!(
                    "maximum sessions ({}) reached",
                    self.config.max_sessions
                )));
            }
        }

        let now = Utc::now();
        let info = SessionInfo {
            session_id: uuid::Uuid::new_v4().to_string(),
            task: task.clone(),
            provider: provider.to_string(),
            model: model.clone(),
            user_id: user_id.clone(),
            mode,
            status: SessionStatus::Active,
            created_at: now,
            last_active_at: now,
            plan_json: None,
            final_report: None,
            error: None,
            snapshot: FollowupSnapshot::default(),
        };
        self.sessions
            .lock()
            .insert(info.session_id.clone(), info.clone());

        // Persist asynchronously; the in-memory record is authoritative
        // for the live path.
        let repository = self.repository.clone();
        let record = SessionRecord {
            session_id: info.session_id.clone(),
            task: task.unwrap_or_default(),
            status: SessionStatus::Active,
            provider: provider.to_string(),
            model,
            mode,
            user_id,
            plan_json: None,
            final_report: None,
            error: None,
            created_at: now,
            updated_at: now,
            last_active_at: now,
        };
        tokio::spawn(async move {
            if let Err(e) = repository.create_session(record).await {
                tracing::warn!(error = %e, "failed to persist new session");
            }
        });

        tracing::info!(session_id = %info.session_id, mode = ?mode, "session created");
        Ok(info)
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Memory first, then the durable directory.
    pub async fn session_exists(&self, session_id: &str) -> bool {
        if self.sessions.lock().contains_key(session_id) {
            return true;
        }
        matches!(self.repository.get_session(session_id).await, Ok(Some(_)))
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(info) = self.sessions.lock().get_mut(session_id) {
            info.touch();
        }
    }

    pub fn list_sessions(&self, user_id: Option<&str>) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock();
        let mut list: Vec<SessionInfo> = sessions
            .values()
            .filter(|s| user_id.map_or(true, |u| s.user_id.as_deref() == Some(u)))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    // ── Orchestrator resolution ───────────────────────────────────

    /// Resolve the session's orchestrator, building a fresh one (plus its
    /// event pump) on first access.
    pub fn get_or_create_orchestrator(self: &Arc<Self>, session_id: &str) -> Result<Orchestrator> {
        if let Some(existing) = self.orchestrators.lock().get(session_id) {
            return Ok(existing.clone());
        }

        let info = self
            .get_session(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let provider = self
            .llm
            .resolve(Some(&info.provider))
            .ok_or_else(|| Error::Config("no LLM provider available".into()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let orchestrator = match info.mode {
            SessionMode::Emergent => Orchestrator::Emergent(Arc::new(MasterOrchestrator::new(
                session_id,
                provider,
                info.model.clone(),
                self.skills.clone(),
                self.executor.clone(),
                events_tx,
                self.config.worker_max_iterations,
            ))),
            SessionMode::Direct => Orchestrator::Direct(Arc::new(DirectAgent::new(
                session_id,
                provider,
                info.model.clone(),
                self.skills.clone(),
                self.executor.clone(),
                events_tx,
            ))),
        };

        self.orchestrators
            .lock()
            .insert(session_id.to_string(), orchestrator.clone());
        self.spawn_event_pump(session_id.to_string(), events_rx);

        Ok(orchestrator)
    }

    pub fn get_orchestrator(&self, session_id: &str) -> Option<Orchestrator> {
        self.orchestrators.lock().get(session_id).cloned()
    }

    // ── Task submission ───────────────────────────────────────────

    /// Submit a task to a session. A task on a finished session becomes a
    /// followup: the prior orchestrator is disposed and the new one gets
    /// the truncated carry-over context and the previous cast.
    /// `extra_context` is client-supplied context merged ahead of the
    /// followup carry-over.
    pub fn submit_task(
        self: &Arc<Self>,
        session_id: &str,
        task: String,
        extra_context: Option<String>,
    ) -> Result<()> {
        let info = self
            .get_session(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let (followup_context, previous_roles) = if info.has_history() {
            self.prepare_followup(session_id)
        } else {
            (None, Vec::new())
        };

        let context = match (extra_context, followup_context) {
            (Some(extra), Some(followup)) => Some(format!("{extra}\n\n{followup}")),
            (Some(extra), None) => Some(extra),
            (None, followup) => followup,
        };

        {
            let mut sessions = self.sessions.lock();
            if let Some(entry) = sessions.get_mut(session_id) {
                entry.task = Some(task.clone());
                entry.status = SessionStatus::Active;
                entry.touch();
            }
        }

        let orchestrator = self.get_or_create_orchestrator(session_id)?;
        match orchestrator {
            Orchestrator::Emergent(master) => {
                tokio::spawn(master.execute_task(task, context, previous_roles));
            }
            Orchestrator::Direct(direct) => {
                tokio::spawn(direct.execute_task(task));
            }
        }
        Ok(())
    }

    /// Dispose the finished orchestrator and hand back the followup
    /// context. The session record (and its snapshot) stays in place.
    fn prepare_followup(&self, session_id: &str) -> (Option<String>, Vec<sg_domain::model::PreviousRole>) {
        if let Some(orchestrator) = self.orchestrators.lock().remove(session_id) {
            orchestrator.cleanup();
            tracing::info!(session_id, "disposed orchestrator for followup");
        }

        let sessions = self.sessions.lock();
        let Some(info) = sessions.get(session_id) else {
            return (None, Vec::new());
        };
        let context = info.snapshot.build_context();
        let context = (!context.is_empty()).then_some(context);
        (context, info.snapshot.previous_roles.clone())
    }

    // ── Subscribers ───────────────────────────────────────────────

    /// Subscribe to a session's event stream. Bounded queue; slow
    /// consumers drop events rather than block the swarm.
    pub fn subscribe(&self, session_id: &str) -> mpsc::Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel(self.config.subscriber_capacity);
        let mut subscribers = self.subscribers.lock();
        let queues = subscribers.entry(session_id.to_string()).or_default();
        queues.push(tx);
        tracing::info!(
            session_id,
            subscribers = queues.len(),
            "client subscribed to session"
        );
        rx
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .lock()
            .get(session_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn subscriber_stats(&self) -> HashMap<String, usize> {
        self.subscribers
            .lock()
            .iter()
            .map(|(id, queues)| (id.clone(), queues.len()))
            .collect()
    }

    /// Non-blocking fan-out. Full queues drop this event for that
    /// subscriber only; closed queues are removed.
    pub fn broadcast(&self, session_id: &str, envelope: EventEnvelope) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(queues) = subscribers.get_mut(session_id) else {
            return 0;
        };

        let mut sent = 0;
        queues.retain(|queue| match queue.try_send(envelope.clone()) {
            Ok(()) => {
                sent += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id, "subscriber queue full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if queues.is_empty() {
            subscribers.remove(session_id);
        }
        sent
    }

    /// Convenience broadcast for UI list refresh.
    pub fn broadcast_state_changed(
        &self,
        session_id: &str,
        change_type: &str,
        summary: serde_json::Value,
    ) -> usize {
        self.broadcast(
            session_id,
            SwarmEvent::SessionStateChanged {
                session_id: session_id.to_string(),
                change_type: change_type.to_string(),
                summary,
            }
            .into_envelope(),
        )
    }

    // ── Event pump ────────────────────────────────────────────────

    fn spawn_event_pump(
        self: &Arc<Self>,
        session_id: String,
        mut events_rx: mpsc::UnboundedReceiver<SwarmEvent>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let envelope = event.into_envelope();
                manager.process_event(&session_id, envelope).await;
            }
            tracing::debug!(session_id = %session_id, "event pump ended");
        });
    }

    /// Persist (critical events synchronously), update the session
    /// record, then fan out.
    async fn process_event(self: &Arc<Self>, session_id: &str, envelope: EventEnvelope) {
        if envelope.event.is_critical() {
            if let Err(e) = self.materialize(session_id, &envelope).await {
                tracing::warn!(session_id, error = %e, "critical event materialization failed");
            }
        } else {
            let manager = self.clone();
            let session_id = session_id.to_string();
            let envelope_clone = envelope.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.materialize(&session_id, &envelope_clone).await {
                    tracing::debug!(session_id = %session_id, error = %e, "event materialization failed");
                }
            });
        }

        self.react(session_id, &envelope.event).await;
        self.broadcast(session_id, envelope);
    }

    /// Session-record side effects of an event.
    async fn react(self: &Arc<Self>, session_id: &str, event: &SwarmEvent) {
        match event {
            SwarmEvent::PlanGenerated { .. } => {
                if let Some(info) = self.sessions.lock().get_mut(session_id) {
                    info.plan_json = serde_json::to_value(event).ok();
                    info.touch();
                }
                self.broadcast_state_changed(session_id, "plan_generated", serde_json::json!({}));
            }
            SwarmEvent::AgentSpawned {
                agent_id,
                agent_name,
                ..
            } => {
                self.broadcast_state_changed(
                    session_id,
                    "agent_added",
                    serde_json::json!({"agent_id": agent_id, "agent_name": agent_name}),
                );
            }
            SwarmEvent::AgentStatusChanged {
                agent_id,
                new_status,
                ..
            } => {
                self.broadcast_state_changed(
                    session_id,
                    "agent_status_changed",
                    serde_json::json!({"agent_id": agent_id, "status": new_status}),
                );
            }
            SwarmEvent::RunFinished { .. } => {
                self.finalize_run(session_id, None).await;
                self.broadcast_state_changed(session_id, "completed", serde_json::json!({}));
            }
            SwarmEvent::RunError { message, .. } => {
                self.finalize_run(session_id, Some(message.clone())).await;
                self.broadcast_state_changed(
                    session_id,
                    "error",
                    serde_json::json!({"message": message}),
                );
            }
            _ => {}
        }
    }

    /// Capture the followup snapshot and settle the session status when a
    /// run ends.
    async fn finalize_run(self: &Arc<Self>, session_id: &str, error: Option<String>) {
        let summary = self
            .get_orchestrator(session_id)
            .map(|o| o.extract_summary());

        {
            let mut sessions = self.sessions.lock();
            if let Some(info) = sessions.get_mut(session_id) {
                match &error {
                    Some(message) => {
                        info.status = SessionStatus::Error;
                        info.error = Some(message.clone());
                    }
                    None => {
                        info.status = SessionStatus::Completed;
                    }
                }
                if let Some(summary) = summary {
                    if !summary.final_report.is_empty() {
                        info.final_report = Some(summary.final_report.clone());
                    }
                    info.snapshot.final_report = summary.final_report;
                    info.snapshot.intervention_summary = summary.intervention_summary;
                    if !summary.previous_roles.is_empty() {
                        info.snapshot.previous_roles = summary.previous_roles;
                    }
                    let entry = TaskHistoryEntry {
                        task: info.task.clone().unwrap_or_default(),
                        summary: sg_domain::model::truncate_chars(
                            &info.snapshot.final_report,
                            500,
                        ),
                        roles: info
                            .snapshot
                            .previous_roles
                            .iter()
                            .map(|r| r.name.clone())
                            .collect(),
                        timestamp: Utc::now(),
                    };
                    info.snapshot.task_history.push(entry);
                    let len = info.snapshot.task_history.len();
                    if len > TASK_HISTORY_MAX_ROUNDS {
                        info.snapshot.task_history.drain(..len - TASK_HISTORY_MAX_ROUNDS);
                    }
                }
                info.touch();
            }
        }

        let (status, final_report) = match &error {
            Some(_) => (SessionStatus::Error, None),
            None => (
                SessionStatus::Completed,
                self.get_session(session_id).and_then(|s| s.final_report),
            ),
        };
        let update = SessionUpdate {
            status: Some(status),
            final_report,
            error,
            plan_json: None,
            last_active_at: Some(Utc::now()),
        };
        if let Err(e) = self.repository.update_session(session_id, update).await {
            tracing::warn!(session_id, error = %e, "failed to persist run outcome");
        }
    }

    /// Event → repository record.
    async fn materialize(&self, session_id: &str, envelope: &EventEnvelope) -> Result<()> {
        match &envelope.event {
            SwarmEvent::AgentSpawned {
                agent_id,
                agent_name,
                role,
                ..
            } => {
                self.repository
                    .upsert_agent(AgentRecord {
                        agent_id: agent_id.clone(),
                        session_id: session_id.to_string(),
                        name: agent_name.clone(),
                        role_name: role.name.clone(),
                        status: WorkerStatus::Pending,
                        progress: 0.0,
                        final_result: None,
                        created_at: envelope.timestamp,
                        updated_at: envelope.timestamp,
                    })
                    .await?;
            }
            SwarmEvent::AgentStatusChanged {
                agent_id,
                new_status,
                ..
            } => {
                let agents = self.repository.list_agents(session_id).await?;
                if let Some(mut record) = agents.into_iter().find(|a| &a.agent_id == agent_id) {
                    record.status = *new_status;
                    record.updated_at = envelope.timestamp;
                    self.repository.upsert_agent(record).await?;
                }
            }
            SwarmEvent::PlanGenerated { .. } => {
                self.repository
                    .update_session(
                        session_id,
                        SessionUpdate {
                            plan_json: serde_json::to_value(&envelope.event).ok(),
                            last_active_at: Some(envelope.timestamp),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            SwarmEvent::RelayStationOpened {
                station_id,
                station_name,
                phase,
                ..
            } => {
                self.repository
                    .upsert_station(StationRecord {
                        station_id: station_id.clone(),
                        session_id: session_id.to_string(),
                        name: station_name.clone(),
                        phase: *phase,
                        is_active: true,
                        started_at: Some(envelope.timestamp),
                        completed_at: None,
                    })
                    .await?;
            }
            SwarmEvent::RelayStationClosed {
                station_id,
                station_name,
                ..
            } => {
                let stations = self.repository.list_stations(session_id).await?;
                let mut record = stations
                    .into_iter()
                    .find(|s| &s.station_id == station_id)
                    .unwrap_or(StationRecord {
                        station_id: station_id.clone(),
                        session_id: session_id.to_string(),
                        name: station_name.clone(),
                        phase: 1,
                        is_active: false,
                        started_at: None,
                        completed_at: None,
                    });
                record.is_active = false;
                record.completed_at = Some(envelope.timestamp);
                self.repository.upsert_station(record).await?;
            }
            SwarmEvent::RelayMessageSent {
                station_id,
                message,
            } => {
                self.repository
                    .create_relay_message(relay_record(session_id, station_id, message))
                    .await?;
            }
            SwarmEvent::TextMessageStart { message_id, role } => {
                self.repository
                    .create_message(MessageRecord {
                        message_id: message_id.clone(),
                        session_id: session_id.to_string(),
                        role: role.clone(),
                        content: String::new(),
                        created_at: envelope.timestamp,
                        updated_at: envelope.timestamp,
                    })
                    .await?;
            }
            SwarmEvent::TextMessageContent { message_id, delta } => {
                self.repository
                    .append_message_delta(session_id, message_id, delta)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Record an intervention both in the durable store and as an
    /// INTERVENTION_REQUESTED event to subscribers.
    pub async fn record_intervention(&self, session_id: &str, intervention: &Intervention) {
        if let Err(e) = self
            .repository
            .create_intervention(InterventionRecord {
                intervention_id: intervention.id.clone(),
                session_id: session_id.to_string(),
                kind: intervention.kind,
                scope: intervention.scope,
                payload: serde_json::Value::Object(intervention.payload.clone()),
                reason: intervention.reason.clone(),
                priority: intervention.priority,
                timestamp: intervention.timestamp,
            })
            .await
        {
            tracing::warn!(session_id, error = %e, "failed to persist intervention");
        }
        self.broadcast(
            session_id,
            SwarmEvent::InterventionRequested {
                intervention: intervention.clone(),
            }
            .into_envelope(),
        );
    }

    // ── Teardown ──────────────────────────────────────────────────

    /// Close and clean up: the orchestrator is torn down atomically with
    /// the in-memory record; the durable record is marked, not deleted.
    pub async fn close_session(&self, session_id: &str) -> bool {
        if let Some(orchestrator) = self.orchestrators.lock().remove(session_id) {
            orchestrator.cleanup();
        }
        let existed = self.sessions.lock().remove(session_id).is_some();
        self.subscribers.lock().remove(session_id);

        if let Err(e) = self
            .repository
            .update_session(session_id, SessionUpdate::status(SessionStatus::Completed))
            .await
        {
            tracing::warn!(session_id, error = %e, "failed to mark session closed");
        }
        tracing::info!(session_id, "session closed");
        existed
    }

    pub async fn delete_session(&self, session_id: &str) -> bool {
        self.close_session(session_id).await;
        self.repository
            .delete_session(session_id)
            .await
            .unwrap_or(false)
    }

    /// Mark idle sessions expired and dispose their orchestrators.
    pub async fn cleanup_expired(self: &Arc<Self>) {
        let expired: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .values()
                .filter(|s| {
                    s.status == SessionStatus::Active && s.is_expired(self.config.timeout_minutes)
                })
                .map(|s| s.session_id.clone())
                .collect()
        };

        for session_id in &expired {
            tracing::info!(session_id = %session_id, "expiring idle session");
            if let Some(orchestrator) = self.orchestrators.lock().remove(session_id) {
                orchestrator.cleanup();
            }
            if let Some(info) = self.sessions.lock().get_mut(session_id) {
                info.status = SessionStatus::Expired;
            }
        }

        if let Err(e) = self
            .repository
            .expire_idle_sessions(self.config.timeout_minutes)
            .await
        {
            tracing::warn!(error = %e, "failed to expire durable sessions");
        }
    }

    /// Periodic TTL sweep.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick is a no-op
            loop {
                ticker.tick().await;
                manager.cleanup_expired().await;
            }
        });
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "active_sessions": self.sessions.lock().len(),
            "active_orchestrators": self.orchestrators.lock().len(),
            "max_sessions": self.config.max_sessions,
            "timeout_minutes": self.config.timeout_minutes,
        })
    }
}

fn relay_record(session_id: &str, station_id: &str, message: &RelayMessage) -> RelayMessageRecord {
    RelayMessageRecord {
        message_id: message.id.clone(),
        session_id: session_id.to_string(),
        station_id: station_id.to_string(),
        kind: message.kind,
        source_worker_id: message.source_worker_id.clone(),
        source_worker_name: message.source_worker_name.clone(),
        target_worker_ids: message.target_worker_ids.clone(),
        content: message.content.clone(),
        importance: message.importance,
        metadata: serde_json::Value::Object(message.metadata.clone()),
        timestamp: message.timestamp,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
