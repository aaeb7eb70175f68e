//! Relay coordinator — the per-session pub/sub hub for worker-to-worker
//! exchange and human interventions.
//!
//! Workers never talk to each other directly: every message goes through
//! the coordinator, which records it in the station and session history
//! and fans it out over per-worker channel ports. One coordinator per
//! session; nothing here is shared across sessions.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use sg_domain::event::SwarmEvent;
use sg_domain::model::{
    Intervention, InterventionKind, InterventionScope, RelayKind, RelayMessage, Station,
    WorkerState,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker ports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a worker receives from the coordinator.
#[derive(Debug, Clone)]
pub struct RelayEnvelope {
    pub message: RelayMessage,
    /// Present when the message carries a human intervention.
    pub intervention: Option<Intervention>,
}

/// Channel ports registered for one worker. The intervention port is
/// preferred for `human_intervention` messages when present; the inject
/// port bypasses the inbox entirely (force-ingest).
pub struct WorkerPorts {
    pub inbox: mpsc::UnboundedSender<RelayEnvelope>,
    pub intervention: Option<mpsc::UnboundedSender<RelayEnvelope>>,
    pub inject: Option<mpsc::UnboundedSender<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    stations: Vec<Station>,
    active_station_id: Option<String>,
    message_history: Vec<RelayMessage>,
    intervention_history: Vec<Intervention>,
    /// Registration order is delivery order.
    workers: Vec<(String, WorkerPorts)>,
}

pub struct RelayCoordinator {
    session_id: String,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<SwarmEvent>,
}

impl RelayCoordinator {
    pub fn new(session_id: impl Into<String>, events: mpsc::UnboundedSender<SwarmEvent>) -> Self {
        let session_id = session_id.into();
        tracing::debug!(session_id = %session_id, "relay coordinator initialized");
        Self {
            session_id,
            inner: Mutex::new(Inner {
                stations: Vec::new(),
                active_station_id: None,
                message_history: Vec::new(),
                intervention_history: Vec::new(),
                workers: Vec::new(),
            }),
            events,
        }
    }

    // ── Worker registration ───────────────────────────────────────

    /// Register a worker's ports. Registering an already-known id
    /// replaces the prior ports.
    pub fn register_worker(&self, worker_id: &str, ports: WorkerPorts) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.workers.iter_mut().find(|(id, _)| id == worker_id) {
            entry.1 = ports;
        } else {
            inner.workers.push((worker_id.to_owned(), ports));
        }
    }

    /// Remove a worker's ports. Past messages are kept; unknown ids are a
    /// no-op.
    pub fn unregister_worker(&self, worker_id: &str) {
        self.inner.lock().workers.retain(|(id, _)| id != worker_id);
    }

    pub fn registered_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .workers
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    // ── Stations ──────────────────────────────────────────────────

    pub fn create_station(&self, name: &str, phase: u32, participants: Vec<String>) -> Station {
        let mut station = Station::new(name, phase);
        station.participants = participants;
        self.inner.lock().stations.push(station.clone());
        station
    }

    /// Mark a station active. Any currently active station is closed
    /// first — at most one station is active per session.
    pub fn open_station(&self, station_id: &str) -> bool {
        if let Some(active) = self.active_station_id() {
            if active != station_id {
                self.close_station(&active);
            }
        }

        let mut inner = self.inner.lock();
        let Some(station) = inner.stations.iter_mut().find(|s| s.id == station_id) else {
            return false;
        };
        station.is_active = true;
        station.started_at = Some(chrono::Utc::now());
        inner.active_station_id = Some(station_id.to_owned());
        true
    }

    /// Close a station and produce its textual summary.
    pub fn close_station(&self, station_id: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let station = inner.stations.iter_mut().find(|s| s.id == station_id)?;
        station.is_active = false;
        station.completed_at = Some(chrono::Utc::now());
        let summary = station_summary(station);
        if inner.active_station_id.as_deref() == Some(station_id) {
            inner.active_station_id = None;
        }
        Some(summary)
    }

    pub fn active_station_id(&self) -> Option<String> {
        self.inner.lock().active_station_id.clone()
    }

    pub fn station(&self, station_id: &str) -> Option<Station> {
        self.inner
            .lock()
            .stations
            .iter()
            .find(|s| s.id == station_id)
            .cloned()
    }

    pub fn stations(&self) -> Vec<Station> {
        self.inner.lock().stations.clone()
    }

    // ── Message broadcast ─────────────────────────────────────────

    /// Append a message to the resolved station and the session history,
    /// then deliver it: explicit targets, or everyone but the sender.
    pub fn broadcast_message(
        &self,
        mut message: RelayMessage,
        station_id: Option<&str>,
    ) -> RelayMessage {
        let mut inner = self.inner.lock();

        // Station resolution: argument > active > last-created.
        let target_station = station_id
            .map(String::from)
            .or_else(|| inner.active_station_id.clone())
            .or_else(|| inner.stations.last().map(|s| s.id.clone()));

        if let Some(sid) = &target_station {
            message
                .metadata
                .insert("station_id".into(), serde_json::json!(sid));
            if let Some(station) = inner.stations.iter_mut().find(|s| &s.id == sid) {
                station.messages.push(message.clone());
            }
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                "no station for relay message, recorded in history only"
            );
        }

        inner.message_history.push(message.clone());

        let targets = resolve_message_targets(&inner.workers, &message);
        for worker_id in &targets {
            if let Some((_, ports)) = inner.workers.iter().find(|(id, _)| id == worker_id) {
                let envelope = RelayEnvelope {
                    message: message.clone(),
                    intervention: None,
                };
                if ports.inbox.send(envelope).is_err() {
                    tracing::warn!(
                        session_id = %self.session_id,
                        worker_id = %worker_id,
                        "relay inbox closed, message dropped for this worker"
                    );
                }
            }
        }
        drop(inner);

        let _ = self.events.send(SwarmEvent::RelayMessageSent {
            station_id: target_station.unwrap_or_default(),
            message: message.clone(),
        });

        message
    }

    // ── Intervention broadcast ────────────────────────────────────

    /// Broadcast a human intervention through the relay.
    ///
    /// Builds the `human_intervention` message, records the intervention
    /// in history, and delivers per scope. Workers with an intervention
    /// port receive it there; others on the plain inbox. Scope `all`
    /// additionally force-ingests the payload information through each
    /// target's inject port before the envelopes go out.
    pub fn broadcast_intervention(&self, intervention: Intervention) -> RelayMessage {
        let mut inner = self.inner.lock();

        let target_station = inner
            .active_station_id
            .clone()
            .or_else(|| inner.stations.last().map(|s| s.id.clone()));

        inner.intervention_history.push(intervention.clone());

        let target_ids = match intervention.scope {
            InterventionScope::Single => intervention
                .target_worker_id
                .clone()
                .map(|id| vec![id])
                .unwrap_or_default(),
            InterventionScope::Selected => intervention.target_worker_ids.clone(),
            // Empty target list means "every registered worker".
            InterventionScope::All | InterventionScope::Broadcast => Vec::new(),
        };

        let mut message = RelayMessage::new(
            RelayKind::HumanIntervention,
            "human",
            "人类操作员",
            target_ids.clone(),
            intervention_content(&intervention),
            (intervention.priority as f32 / 10.0 + 0.3).min(1.0),
        );
        message
            .metadata
            .insert("intervention_id".into(), serde_json::json!(intervention.id));
        message.metadata.insert(
            "intervention_type".into(),
            serde_json::json!(intervention.kind.as_str()),
        );
        message.metadata.insert(
            "scope".into(),
            serde_json::to_value(intervention.scope).unwrap_or_default(),
        );
        message
            .metadata
            .insert("priority".into(), serde_json::json!(intervention.priority));
        message.metadata.insert(
            "payload".into(),
            serde_json::Value::Object(intervention.payload.clone()),
        );
        message
            .metadata
            .insert("requires_acknowledgement".into(), serde_json::json!(true));
        message.metadata.insert(
            "station_id".into(),
            serde_json::json!(target_station.clone().unwrap_or_default()),
        );

        if let Some(sid) = &target_station {
            if let Some(station) = inner.stations.iter_mut().find(|s| &s.id == sid) {
                station.messages.push(message.clone());
            }
        }
        inner.message_history.push(message.clone());

        let actual_targets: Vec<String> = if target_ids.is_empty() {
            inner.workers.iter().map(|(id, _)| id.clone()).collect()
        } else {
            target_ids
        };

        // Scope `all` force-applies: the payload information goes straight
        // into each worker's message log, ahead of the inbox envelope.
        if intervention.scope == InterventionScope::All {
            if let Some(info) = intervention.information() {
                for worker_id in &actual_targets {
                    if let Some((_, ports)) = inner.workers.iter().find(|(id, _)| id == worker_id)
                    {
                        if let Some(inject) = &ports.inject {
                            let _ = inject.send(info.to_string());
                        }
                    }
                }
            }
        }

        for worker_id in &actual_targets {
            let Some((_, ports)) = inner.workers.iter().find(|(id, _)| id == worker_id) else {
                tracing::warn!(
                    session_id = %self.session_id,
                    worker_id = %worker_id,
                    "intervention target not registered"
                );
                continue;
            };
            let envelope = RelayEnvelope {
                message: message.clone(),
                intervention: Some(intervention.clone()),
            };
            let failed = match &ports.intervention {
                Some(port) => port.send(envelope).is_err(),
                None => ports.inbox.send(envelope).is_err(),
            };
            if failed {
                tracing::warn!(
                    session_id = %self.session_id,
                    worker_id = %worker_id,
                    "intervention port closed, delivery dropped for this worker"
                );
            }
        }
        drop(inner);

        let _ = self.events.send(SwarmEvent::RelayMessageSent {
            station_id: target_station.unwrap_or_default(),
            message: message.clone(),
        });
        let _ = self.events.send(SwarmEvent::InterventionBroadcast {
            intervention_id: intervention.id.clone(),
            message_id: message.id.clone(),
            target_ids: actual_targets,
        });

        message
    }

    /// Append an intervention to history without broadcasting it (the
    /// `broadcast=false` paths still keep the record complete).
    pub fn record_intervention(&self, intervention: Intervention) {
        self.inner.lock().intervention_history.push(intervention);
    }

    // ── Alignment and checkpoints ─────────────────────────────────

    /// A worker asks the others to calibrate. Non-blocking: the request
    /// is broadcast and any alignment-kind history is returned for
    /// immediate context.
    pub fn request_alignment(
        &self,
        requester_id: &str,
        requester_name: &str,
        reason: &str,
        current_understanding: &str,
    ) -> Vec<RelayMessage> {
        let message = RelayMessage::new(
            RelayKind::Alignment,
            requester_id,
            requester_name,
            Vec::new(),
            format!("请求对齐：{reason}\n\n当前理解：{current_understanding}"),
            0.9,
        )
        .with_metadata("reason", serde_json::json!(reason));

        self.broadcast_message(message, None);

        self.inner
            .lock()
            .message_history
            .iter()
            .filter(|m| {
                matches!(
                    m.kind,
                    RelayKind::Alignment | RelayKind::AlignmentRequest | RelayKind::AlignmentResponse
                )
            })
            .cloned()
            .collect()
    }

    /// Phase checkpoint: aggregate worker progress and broadcast a
    /// CHECKPOINT message. A progress spread above 30 points flags that
    /// alignment is needed.
    pub fn checkpoint(&self, worker_states: &[WorkerState], phase: u32) -> serde_json::Value {
        let mut agents = serde_json::Map::new();
        for state in worker_states {
            agents.insert(
                state.id.clone(),
                serde_json::json!({
                    "name": state.name,
                    "status": state.status,
                    "progress": state.progress,
                    "partial_result": sg_domain::model::truncate_chars(&state.partial_result, 500),
                }),
            );
        }

        let progresses: Vec<f32> = worker_states.iter().map(|s| s.progress).collect();
        let alignment_needed = match (
            progresses.iter().cloned().reduce(f32::max),
            progresses.iter().cloned().reduce(f32::min),
        ) {
            (Some(max), Some(min)) => max - min > 30.0,
            _ => false,
        };

        let summary = serde_json::json!({
            "phase": phase,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "agents": agents,
            "alignment_needed": alignment_needed,
        });

        let mut message = RelayMessage::new(
            RelayKind::Checkpoint,
            "master",
            "Master",
            Vec::new(),
            format!("阶段 {phase} 检查点：已汇总 {} 个 Agent 的进度", worker_states.len()),
            0.7,
        );
        if let serde_json::Value::Object(map) = summary.clone() {
            message.metadata = map;
        }
        self.broadcast_message(message, None);

        summary
    }

    // ── History, viewed/ack bookkeeping ───────────────────────────

    /// Record that a worker has seen a message. Monotonic: both the
    /// station copy and the history copy grow, never shrink.
    pub fn mark_viewed(&self, message_id: &str, worker_id: &str) {
        let mut inner = self.inner.lock();
        for station in inner.stations.iter_mut() {
            if let Some(msg) = station.messages.iter_mut().find(|m| m.id == message_id) {
                msg.mark_viewed(worker_id);
            }
        }
        if let Some(msg) = inner
            .message_history
            .iter_mut()
            .find(|m| m.id == message_id)
        {
            msg.mark_viewed(worker_id);
        }
    }

    /// Record a worker's acknowledgement. Idempotent.
    pub fn acknowledge(&self, message_id: &str, worker_id: &str) {
        let mut inner = self.inner.lock();
        for station in inner.stations.iter_mut() {
            if let Some(msg) = station.messages.iter_mut().find(|m| m.id == message_id) {
                msg.acknowledge(worker_id);
            }
        }
        if let Some(msg) = inner
            .message_history
            .iter_mut()
            .find(|m| m.id == message_id)
        {
            msg.acknowledge(worker_id);
        }
    }

    pub fn message_history(&self) -> Vec<RelayMessage> {
        self.inner.lock().message_history.clone()
    }

    pub fn get_message(&self, message_id: &str) -> Option<RelayMessage> {
        self.inner
            .lock()
            .message_history
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub fn intervention_history(&self) -> Vec<Intervention> {
        self.inner.lock().intervention_history.clone()
    }

    /// Relay messages that carry human interventions, session-wide or
    /// scoped to one station.
    pub fn intervention_messages(&self, station_id: Option<&str>) -> Vec<RelayMessage> {
        let inner = self.inner.lock();
        let source: Vec<&RelayMessage> = match station_id {
            Some(sid) => inner
                .stations
                .iter()
                .find(|s| s.id == sid)
                .map(|s| s.messages.iter().collect())
                .unwrap_or_default(),
            None => inner.message_history.iter().collect(),
        };
        source
            .into_iter()
            .filter(|m| m.kind == RelayKind::HumanIntervention)
            .cloned()
            .collect()
    }

    /// Tear down all coordinator state (session cleanup).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.workers.clear();
        inner.stations.clear();
        inner.message_history.clear();
        inner.intervention_history.clear();
        inner.active_station_id = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn resolve_message_targets(
    workers: &[(String, WorkerPorts)],
    message: &RelayMessage,
) -> Vec<String> {
    if message.target_worker_ids.is_empty() {
        workers
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| id != &message.source_worker_id)
            .collect()
    } else {
        message.target_worker_ids.clone()
    }
}

fn intervention_content(intervention: &Intervention) -> String {
    let mut parts = vec![
        "🚨 **人工干预通知**".to_string(),
        String::new(),
        format!("**干预类型**: {}", intervention.kind.as_str()),
        format!(
            "**作用范围**: {}",
            serde_json::to_value(intervention.scope)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default()
        ),
        format!("**优先级**: {}/10", intervention.priority),
    ];

    if !intervention.reason.is_empty() {
        parts.push(format!("**干预原因**: {}", intervention.reason));
    }

    match intervention.kind {
        InterventionKind::Inject => {
            parts.push(String::new());
            parts.push("**注入信息**:".into());
            parts.push(intervention.information().unwrap_or_default().to_string());
        }
        InterventionKind::Adjust => {
            parts.push(String::new());
            parts.push("**调整指令**:".into());
            if let Some(adjustments) = intervention.adjustments() {
                for (key, value) in adjustments {
                    parts.push(format!("- {key}: {value}"));
                }
            }
        }
        InterventionKind::Pause => {
            parts.push(String::new());
            parts.push("**指令**: 暂停当前工作，等待进一步指示".into());
        }
        InterventionKind::Resume => {
            parts.push(String::new());
            parts.push("**指令**: 恢复工作，继续之前的任务".into());
        }
        InterventionKind::Cancel => {
            parts.push(String::new());
            parts.push("**指令**: 取消当前任务".into());
        }
        InterventionKind::Restart => {
            parts.push(String::new());
            parts.push("**指令**: 重新开始任务".into());
        }
    }

    parts.join("\n")
}

/// Textual station summary: counts plus per-message highlights, starring
/// anything above 0.7 importance.
fn station_summary(station: &Station) -> String {
    let mut parts = vec![
        format!("## 中继站: {} (阶段 {})", station.name, station.phase),
        format!("持续时间: {}", station_duration(station)),
        format!("消息数量: {}", station.messages.len()),
        String::new(),
    ];

    let intervention_count = station
        .messages
        .iter()
        .filter(|m| m.kind == RelayKind::HumanIntervention)
        .count();
    if intervention_count > 0 {
        parts.push(format!("人工干预次数: {intervention_count}"));
        parts.push(String::new());
    }

    parts.push("### 关键信息交换:".into());
    for msg in &station.messages {
        let star = if msg.importance > 0.7 { " ⭐" } else { "" };
        let mark = if msg.kind == RelayKind::HumanIntervention {
            "🚨"
        } else {
            ""
        };
        let kind = serde_json::to_value(msg.kind)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        parts.push(format!(
            "- {mark}[{kind}] {}: {}...{star}",
            msg.source_worker_name,
            sg_domain::model::truncate_chars(&msg.content, 100),
        ));
    }

    parts.join("\n")
}

fn station_duration(station: &Station) -> String {
    match (station.started_at, station.completed_at) {
        (Some(start), Some(end)) => {
            let secs = (end - start).num_milliseconds() as f64 / 1000.0;
            format!("{secs:.1}秒")
        }
        _ => "进行中".into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    struct TestWorker {
        inbox: mpsc::UnboundedReceiver<RelayEnvelope>,
        intervention: Option<mpsc::UnboundedReceiver<RelayEnvelope>>,
        inject: mpsc::UnboundedReceiver<String>,
    }

    fn coordinator() -> (RelayCoordinator, mpsc::UnboundedReceiver<SwarmEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RelayCoordinator::new("sess-1", tx), rx)
    }

    fn attach(coord: &RelayCoordinator, id: &str, with_intervention_port: bool) -> TestWorker {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (int_tx, int_rx) = mpsc::unbounded_channel();
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        coord.register_worker(
            id,
            WorkerPorts {
                inbox: inbox_tx,
                intervention: with_intervention_port.then_some(int_tx),
                inject: Some(inject_tx),
            },
        );
        TestWorker {
            inbox: inbox_rx,
            intervention: with_intervention_port.then_some(int_rx),
            inject: inject_rx,
        }
    }

    fn discovery(source: &str, targets: Vec<String>) -> RelayMessage {
        RelayMessage::new(RelayKind::Discovery, source, "源角色", targets, "关键发现内容", 0.8)
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let (coord, _events) = coordinator();
        let mut w1 = attach(&coord, "w1", false);
        let mut w2 = attach(&coord, "w2", false);
        let mut w3 = attach(&coord, "w3", false);

        coord.broadcast_message(discovery("w1", vec![]), None);

        assert!(w1.inbox.try_recv().is_err());
        assert!(w2.inbox.try_recv().is_ok());
        assert!(w3.inbox.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_explicit_targets_only() {
        let (coord, _events) = coordinator();
        let mut w1 = attach(&coord, "w1", false);
        let mut w2 = attach(&coord, "w2", false);
        let mut w3 = attach(&coord, "w3", false);

        coord.broadcast_message(discovery("w1", vec!["w3".into()]), None);

        assert!(w1.inbox.try_recv().is_err());
        assert!(w2.inbox.try_recv().is_err());
        assert!(w3.inbox.try_recv().is_ok());
    }

    #[tokio::test]
    async fn duplicate_registration_replaces_ports() {
        let (coord, _events) = coordinator();
        let mut old = attach(&coord, "w1", false);
        let mut new = attach(&coord, "w1", false);

        coord.broadcast_message(discovery("w2", vec!["w1".into()]), None);

        assert!(old.inbox.try_recv().is_err());
        assert!(new.inbox.try_recv().is_ok());
        assert_eq!(coord.registered_ids(), vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn unregister_unknown_is_noop() {
        let (coord, _events) = coordinator();
        coord.unregister_worker("ghost");
        assert!(coord.registered_ids().is_empty());
    }

    #[tokio::test]
    async fn message_recorded_in_station_and_history() {
        let (coord, _events) = coordinator();
        let _w = attach(&coord, "w1", false);
        let station = coord.create_station("阶段1中继站", 1, vec!["w1".into()]);
        assert!(coord.open_station(&station.id));

        coord.broadcast_message(discovery("w2", vec![]), None);

        assert_eq!(coord.message_history().len(), 1);
        assert_eq!(coord.station(&station.id).unwrap().messages.len(), 1);
        let recorded = &coord.message_history()[0];
        assert_eq!(
            recorded.metadata.get("station_id").unwrap(),
            &serde_json::json!(station.id)
        );
    }

    #[tokio::test]
    async fn opening_second_station_closes_first() {
        let (coord, _events) = coordinator();
        let s1 = coord.create_station("一", 1, vec![]);
        let s2 = coord.create_station("二", 2, vec![]);

        coord.open_station(&s1.id);
        assert_eq!(coord.active_station_id().as_deref(), Some(s1.id.as_str()));

        coord.open_station(&s2.id);
        assert_eq!(coord.active_station_id().as_deref(), Some(s2.id.as_str()));
        let closed = coord.station(&s1.id).unwrap();
        assert!(!closed.is_active);
        assert!(closed.completed_at.is_some());
    }

    #[tokio::test]
    async fn empty_station_still_summarizes() {
        let (coord, _events) = coordinator();
        let s = coord.create_station("空站", 1, vec![]);
        coord.open_station(&s.id);
        let summary = coord.close_station(&s.id).unwrap();
        assert!(summary.contains("消息数量: 0"));
    }

    #[tokio::test]
    async fn station_summary_stars_important_messages() {
        let (coord, _events) = coordinator();
        let s = coord.create_station("站", 1, vec![]);
        coord.open_station(&s.id);
        coord.broadcast_message(
            RelayMessage::new(RelayKind::Insight, "w1", "分析师", vec![], "高价值洞察", 0.9),
            None,
        );
        coord.broadcast_message(
            RelayMessage::new(RelayKind::Suggestion, "w1", "分析师", vec![], "普通建议", 0.4),
            None,
        );
        let summary = coord.close_station(&s.id).unwrap();
        assert!(summary.contains("高价值洞察"));
        assert!(summary.contains('⭐'));
        assert!(summary.contains("消息数量: 2"));
    }

    #[tokio::test]
    async fn intervention_importance_formula() {
        let (coord, _events) = coordinator();
        let _w = attach(&coord, "w1", false);

        let msg = coord.broadcast_intervention(
            Intervention::new(InterventionKind::Pause, InterventionScope::Single, 6)
                .with_target("w1"),
        );
        assert!((msg.importance - 0.9).abs() < 1e-6);

        let msg = coord.broadcast_intervention(
            Intervention::new(InterventionKind::Pause, InterventionScope::Single, 10)
                .with_target("w1"),
        );
        assert_eq!(msg.importance, 1.0);
    }

    #[tokio::test]
    async fn intervention_prefers_intervention_port() {
        let (coord, _events) = coordinator();
        let mut with_port = attach(&coord, "w1", true);
        let mut without_port = attach(&coord, "w2", false);

        coord.broadcast_intervention(
            Intervention::new(InterventionKind::Inject, InterventionScope::Broadcast, 5)
                .with_payload("information", serde_json::json!("新信息")),
        );

        let envelope = with_port.intervention.as_mut().unwrap().try_recv().unwrap();
        assert!(envelope.intervention.is_some());
        assert!(with_port.inbox.try_recv().is_err());
        assert!(without_port.inbox.try_recv().is_ok());
    }

    #[tokio::test]
    async fn scope_all_force_ingests_payload() {
        let (coord, _events) = coordinator();
        let mut w1 = attach(&coord, "w1", true);
        let mut w2 = attach(&coord, "w2", true);

        coord.broadcast_intervention(
            Intervention::new(InterventionKind::Inject, InterventionScope::All, 8)
                .with_payload("information", serde_json::json!("停止并总结")),
        );

        assert_eq!(w1.inject.try_recv().unwrap(), "停止并总结");
        assert_eq!(w2.inject.try_recv().unwrap(), "停止并总结");
        // And both still receive the relay envelope.
        assert!(w1.intervention.as_mut().unwrap().try_recv().is_ok());
        assert!(w2.intervention.as_mut().unwrap().try_recv().is_ok());
    }

    #[tokio::test]
    async fn scope_broadcast_does_not_force_ingest() {
        let (coord, _events) = coordinator();
        let mut w1 = attach(&coord, "w1", true);

        coord.broadcast_intervention(
            Intervention::new(InterventionKind::Inject, InterventionScope::Broadcast, 8)
                .with_payload("information", serde_json::json!("仅通知")),
        );

        assert!(w1.inject.try_recv().is_err());
        assert!(w1.intervention.as_mut().unwrap().try_recv().is_ok());
    }

    #[tokio::test]
    async fn intervention_message_requires_acknowledgement() {
        let (coord, _events) = coordinator();
        let _w = attach(&coord, "w1", false);
        let msg = coord.broadcast_intervention(
            Intervention::new(InterventionKind::Adjust, InterventionScope::Single, 6)
                .with_target("w1")
                .with_payload("adjustments", serde_json::json!({"focus": "镜头"})),
        );
        assert!(msg.requires_acknowledgement());
        assert!(msg.content.contains("调整指令"));
        assert!(msg.content.contains("focus"));
    }

    #[tokio::test]
    async fn relay_event_emitted_on_broadcast() {
        let (coord, mut events) = coordinator();
        let _w = attach(&coord, "w1", false);
        coord.broadcast_message(discovery("w2", vec![]), None);
        match events.try_recv().unwrap() {
            SwarmEvent::RelayMessageSent { message, .. } => {
                assert_eq!(message.kind, RelayKind::Discovery);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn checkpoint_flags_progress_spread() {
        let (coord, _events) = coordinator();
        let mut a = WorkerState::new("w1", "甲");
        a.set_progress(80.0, "深入");
        let mut b = WorkerState::new("w2", "乙");
        b.set_progress(20.0, "起步");

        let summary = coord.checkpoint(&[a, b], 1);
        assert_eq!(summary["alignment_needed"], true);

        let mut c = WorkerState::new("w3", "丙");
        c.set_progress(50.0, "中段");
        let mut d = WorkerState::new("w4", "丁");
        d.set_progress(60.0, "中段");
        let summary = coord.checkpoint(&[c, d], 2);
        assert_eq!(summary["alignment_needed"], false);
    }

    #[tokio::test]
    async fn request_alignment_returns_alignment_history() {
        let (coord, _events) = coordinator();
        let _w = attach(&coord, "w2", false);
        coord.broadcast_message(discovery("w2", vec![]), None);

        let related = coord.request_alignment("w1", "分析师甲", "需要确认口径", "目前认为镜头偏长");
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].kind, RelayKind::Alignment);
    }

    #[tokio::test]
    async fn viewed_and_ack_updates_are_idempotent() {
        let (coord, _events) = coordinator();
        let _w = attach(&coord, "w1", false);
        let s = coord.create_station("站", 1, vec![]);
        coord.open_station(&s.id);
        let msg = coord.broadcast_message(discovery("w2", vec![]), None);

        coord.mark_viewed(&msg.id, "w1");
        coord.mark_viewed(&msg.id, "w1");
        coord.acknowledge(&msg.id, "w1");
        coord.acknowledge(&msg.id, "w1");

        let stored = coord.get_message(&msg.id).unwrap();
        assert_eq!(stored.viewed_by.len(), 1);
        assert_eq!(stored.acknowledged_by.len(), 1);
        // The station copy tracks the same bookkeeping.
        let station_copy = &coord.station(&s.id).unwrap().messages[0];
        assert!(station_copy.viewed_by.contains("w1"));
        assert!(station_copy.acknowledged_by.contains("w1"));
    }
}
