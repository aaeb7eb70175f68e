//! Core data model for the swarm runtime.
//!
//! These types are shared between the relay coordinator, worker runtime,
//! planner, orchestrator, session manager, and the HTTP surface. Wire
//! serialization is plain serde; identity is by `id` everywhere.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enumerations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Planning,
    Running,
    WaitingRelay,
    Relaying,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    Discovery,
    Insight,
    AlignmentRequest,
    AlignmentResponse,
    Alignment,
    Suggestion,
    Question,
    Confirmation,
    Checkpoint,
    Correction,
    Completion,
    HumanIntervention,
}

impl RelayKind {
    /// Response-style messages get looser validity checks (a salutation
    /// opener is fine as long as a body follows).
    pub fn is_response(self) -> bool {
        matches!(self, Self::AlignmentResponse | Self::Confirmation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    Pause,
    Resume,
    Restart,
    Adjust,
    Inject,
    Cancel,
}

impl InterventionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Restart => "restart",
            Self::Adjust => "adjust",
            Self::Inject => "inject",
            Self::Cancel => "cancel",
        }
    }
}

/// `All` force-applies the directive to every worker; `Broadcast` only
/// notifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionScope {
    Single,
    Selected,
    All,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Emergent,
    Direct,
}

impl Default for SessionMode {
    fn default() -> Self {
        Self::Emergent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Expired,
    Error,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles and plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a role approaches its work: the planner fills this from the plan
/// JSON and the worker folds it into its system prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkMethodology {
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub tools_and_frameworks: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub quality_metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillAssignment {
    pub skill_name: String,
    #[serde(default)]
    pub skill_display_name: String,
    #[serde(default)]
    pub reason: String,
}

/// An emergent specialist profile synthesized by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default = "default_expertise")]
    pub expertise_level: String,
    #[serde(default)]
    pub work_objective: String,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methodology: Option<WorkMethodology>,
    #[serde(default)]
    pub assigned_skills: Vec<SkillAssignment>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub relay_triggers: Vec<String>,
    #[serde(default)]
    pub emergence_reasoning: String,
}

fn default_expertise() -> String {
    "expert".into()
}

/// One worker's slot in the plan: the role plus its task segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: String,
    pub role: RoleProfile,
    pub task_segment: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_true")]
    pub relay_enabled: bool,
}

fn default_priority() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

impl WorkerSpec {
    pub fn new(role: RoleProfile, task_segment: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            task_segment: task_segment.into(),
            priority: 5,
            relay_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanPhase {
    #[serde(default = "default_phase")]
    pub phase_number: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub participating_roles: Vec<String>,
    #[serde(default)]
    pub relay_strategy: String,
    #[serde(default)]
    pub expected_output: String,
}

fn default_phase() -> u32 {
    1
}

/// The planner's output: roles, phases, stations, analysis prose and the
/// original task it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: String,
    pub original_task: String,
    pub analysis: String,
    pub workers: Vec<WorkerSpec>,
    pub stations: Vec<Station>,
    pub phases: Vec<PlanPhase>,
    pub estimated_duration_seconds: u64,
    #[serde(default)]
    pub integration_strategy: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay messages and stations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An inter-worker message mediated by the relay coordinator.
///
/// `viewed_by` / `acknowledged_by` only ever grow; both mutations are
/// idempotent per worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub id: String,
    pub kind: RelayKind,
    pub source_worker_id: String,
    pub source_worker_name: String,
    /// Empty = broadcast to all registered workers except the sender.
    #[serde(default)]
    pub target_worker_ids: Vec<String>,
    pub content: String,
    pub importance: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub viewed_by: BTreeSet<String>,
    #[serde(default)]
    pub acknowledged_by: BTreeSet<String>,
    #[serde(default)]
    pub viewed_timestamps: BTreeMap<String, DateTime<Utc>>,
}

impl RelayMessage {
    pub fn new(
        kind: RelayKind,
        source_worker_id: impl Into<String>,
        source_worker_name: impl Into<String>,
        target_worker_ids: Vec<String>,
        content: impl Into<String>,
        importance: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            source_worker_id: source_worker_id.into(),
            source_worker_name: source_worker_name.into(),
            target_worker_ids,
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
            viewed_by: BTreeSet::new(),
            acknowledged_by: BTreeSet::new(),
            viewed_timestamps: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn mark_viewed(&mut self, worker_id: &str) {
        if self.viewed_by.insert(worker_id.to_string()) {
            self.viewed_timestamps
                .insert(worker_id.to_string(), Utc::now());
        }
    }

    pub fn acknowledge(&mut self, worker_id: &str) {
        self.acknowledged_by.insert(worker_id.to_string());
    }

    pub fn raise_importance(&mut self, floor: f32) {
        self.importance = self.importance.max(floor).clamp(0.0, 1.0);
    }

    pub fn requires_acknowledgement(&self) -> bool {
        self.metadata
            .get("requires_acknowledgement")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn requires_response(&self) -> bool {
        self.metadata
            .get("requires_response")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// For `human_intervention` messages: the embedded intervention kind.
    pub fn intervention_kind(&self) -> Option<InterventionKind> {
        let raw = self.metadata.get("intervention_type")?.as_str()?;
        serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
    }

    /// For `human_intervention` messages: the embedded priority (default 5).
    pub fn intervention_priority(&self) -> u8 {
        self.metadata
            .get("priority")
            .and_then(|v| v.as_u64())
            .map(|p| p.min(10) as u8)
            .unwrap_or(5)
    }
}

/// A phase-scoped message container. At most one station is active per
/// session at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub phase: u32,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<RelayMessage>,
}

impl Station {
    pub fn new(name: impl Into<String>, phase: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            phase,
            participants: Vec::new(),
            is_active: false,
            started_at: None,
            completed_at: None,
            messages: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interventions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A human directive applied to one or more workers. Always appended to
/// the session's intervention history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub id: String,
    pub kind: InterventionKind,
    pub scope: InterventionScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_worker_id: Option<String>,
    #[serde(default)]
    pub target_worker_ids: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub reason: String,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub broadcast_to_relay: bool,
}

impl Intervention {
    pub fn new(kind: InterventionKind, scope: InterventionScope, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            scope,
            target_worker_id: None,
            target_worker_ids: Vec::new(),
            payload: serde_json::Map::new(),
            reason: String::new(),
            priority: priority.clamp(1, 10),
            timestamp: Utc::now(),
            broadcast_to_relay: true,
        }
    }

    pub fn with_target(mut self, worker_id: impl Into<String>) -> Self {
        self.target_worker_id = Some(worker_id.into());
        self
    }

    pub fn with_targets(mut self, worker_ids: Vec<String>) -> Self {
        self.target_worker_ids = worker_ids;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_payload(mut self, key: &str, value: serde_json::Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    pub fn information(&self) -> Option<&str> {
        self.payload.get("information").and_then(|v| v.as_str())
    }

    pub fn adjustments(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.payload.get("adjustments").and_then(|v| v.as_object())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The externally visible slice of a worker. The worker's own task is the
/// only writer; everyone else observes it through the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub progress: f32,
    #[serde(default)]
    pub current_step: String,
    pub iterations: u32,
    #[serde(default)]
    pub thinking: String,
    #[serde(default)]
    pub partial_result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub relay_messages_sent: u32,
    #[serde(default)]
    pub relay_messages_received: u32,
    #[serde(default)]
    pub injected_info_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl WorkerState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: WorkerStatus::Pending,
            progress: 0.0,
            current_step: String::new(),
            iterations: 0,
            thinking: String::new(),
            partial_result: String::new(),
            final_result: None,
            error: None,
            relay_messages_sent: 0,
            relay_messages_received: 0,
            injected_info_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn set_status(&mut self, status: WorkerStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_progress(&mut self, progress: f32, step: impl Into<String>) {
        self.progress = progress.clamp(0.0, 100.0);
        self.current_step = step.into();
        self.updated_at = Utc::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Followup snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub task: String,
    pub summary: String,
    pub roles: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Compact record of a previous role, fed back to the planner so a
/// followup round can reuse the cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousRole {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub focus_areas: Vec<String>,
    pub task_segment: String,
    pub expertise_level: String,
}

/// What a completed task leaves behind for the next round on the same
/// session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowupSnapshot {
    #[serde(default)]
    pub final_report: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention_summary: Option<String>,
    #[serde(default)]
    pub previous_roles: Vec<PreviousRole>,
    #[serde(default)]
    pub task_history: Vec<TaskHistoryEntry>,
}

pub const FOLLOWUP_REPORT_MAX_CHARS: usize = 1500;
pub const FOLLOWUP_CONTEXT_MAX_CHARS: usize = 2500;
pub const TASK_HISTORY_MAX_ROUNDS: usize = 3;

impl FollowupSnapshot {
    /// Render the followup context string injected into the next round's
    /// planner. Three-layer budget: report first 1500 chars, intervention
    /// summary as saved, total capped at `FOLLOWUP_CONTEXT_MAX_CHARS`.
    pub fn build_context(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if !self.task_history.is_empty() {
            parts.push("## 历史任务记录".into());
            let start = self
                .task_history
                .len()
                .saturating_sub(TASK_HISTORY_MAX_ROUNDS);
            for (i, entry) in self.task_history[start..].iter().enumerate() {
                parts.push(format!("### 第 {} 轮", i + 1));
                parts.push(format!("- 任务: {}", entry.task));
                if !entry.summary.is_empty() {
                    parts.push(format!("- 结论摘要: {}", truncate_chars(&entry.summary, 500)));
                }
            }
            parts.push(String::new());
        }

        if !self.final_report.is_empty() {
            let mut report = truncate_chars(&self.final_report, FOLLOWUP_REPORT_MAX_CHARS);
            if self.final_report.chars().count() > FOLLOWUP_REPORT_MAX_CHARS {
                report.push_str("\n...(报告已截取前 1500 字符)");
            }
            parts.push("## 上一轮任务的最终报告".into());
            parts.push(report);
            parts.push(String::new());
        }

        if let Some(summary) = &self.intervention_summary {
            parts.push("## 用户干预记录".into());
            parts.push(summary.clone());
            parts.push(String::new());
        }

        let mut context = parts.join("\n");
        if context.chars().count() > FOLLOWUP_CONTEXT_MAX_CHARS {
            context = truncate_chars(&context, FOLLOWUP_CONTEXT_MAX_CHARS);
            context.push_str("\n...(上下文已截取)");
        }
        context
    }
}

/// Char-boundary-safe prefix (counts chars, not bytes — content is
/// routinely CJK).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_message_importance_clamped() {
        let msg = RelayMessage::new(RelayKind::Discovery, "w1", "Analyst", vec![], "found", 1.7);
        assert_eq!(msg.importance, 1.0);
        let msg = RelayMessage::new(RelayKind::Discovery, "w1", "Analyst", vec![], "found", -0.3);
        assert_eq!(msg.importance, 0.0);
    }

    #[test]
    fn mark_viewed_is_monotonic_and_idempotent() {
        let mut msg =
            RelayMessage::new(RelayKind::Insight, "w1", "Analyst", vec![], "insight", 0.8);
        msg.mark_viewed("w2");
        let first_ts = *msg.viewed_timestamps.get("w2").unwrap();
        msg.mark_viewed("w2");
        assert_eq!(msg.viewed_by.len(), 1);
        // Second mark must not move the recorded timestamp.
        assert_eq!(*msg.viewed_timestamps.get("w2").unwrap(), first_ts);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut msg =
            RelayMessage::new(RelayKind::HumanIntervention, "human", "操作员", vec![], "stop", 1.0);
        msg.acknowledge("w1");
        msg.acknowledge("w1");
        assert_eq!(msg.acknowledged_by.len(), 1);
    }

    #[test]
    fn intervention_priority_clamped() {
        let i = Intervention::new(InterventionKind::Inject, InterventionScope::Single, 42);
        assert_eq!(i.priority, 10);
        let i = Intervention::new(InterventionKind::Inject, InterventionScope::Single, 0);
        assert_eq!(i.priority, 1);
    }

    #[test]
    fn intervention_metadata_round_trip_through_relay() {
        let msg = RelayMessage::new(
            RelayKind::HumanIntervention,
            "human",
            "操作员",
            vec!["w1".into()],
            "body",
            1.0,
        )
        .with_metadata("intervention_type", serde_json::json!("adjust"))
        .with_metadata("priority", serde_json::json!(8))
        .with_metadata("requires_acknowledgement", serde_json::json!(true));

        assert_eq!(msg.intervention_kind(), Some(InterventionKind::Adjust));
        assert_eq!(msg.intervention_priority(), 8);
        assert!(msg.requires_acknowledgement());
    }

    #[test]
    fn worker_progress_clamped() {
        let mut state = WorkerState::new("w1", "Analyst");
        state.set_progress(150.0, "step");
        assert_eq!(state.progress, 100.0);
        state.set_progress(-5.0, "step");
        assert_eq!(state.progress, 0.0);
    }

    #[test]
    fn worker_status_terminal() {
        assert!(WorkerStatus::Completed.is_terminal());
        assert!(WorkerStatus::Failed.is_terminal());
        assert!(WorkerStatus::Cancelled.is_terminal());
        assert!(!WorkerStatus::Paused.is_terminal());
        assert!(!WorkerStatus::Running.is_terminal());
    }

    #[test]
    fn followup_context_truncates_report() {
        let snapshot = FollowupSnapshot {
            final_report: "报".repeat(3000),
            intervention_summary: None,
            previous_roles: vec![],
            task_history: vec![],
        };
        let ctx = snapshot.build_context();
        assert!(ctx.chars().count() <= FOLLOWUP_CONTEXT_MAX_CHARS + 20);
        assert!(ctx.contains("上一轮任务的最终报告"));
    }

    #[test]
    fn followup_context_keeps_last_three_rounds() {
        let entry = |n: usize| TaskHistoryEntry {
            task: format!("task {n}"),
            summary: format!("summary {n}"),
            roles: vec![],
            timestamp: Utc::now(),
        };
        let snapshot = FollowupSnapshot {
            final_report: String::new(),
            intervention_summary: None,
            previous_roles: vec![],
            task_history: (0..5).map(entry).collect(),
        };
        let ctx = snapshot.build_context();
        assert!(!ctx.contains("task 0"));
        assert!(!ctx.contains("task 1"));
        assert!(ctx.contains("task 2"));
        assert!(ctx.contains("task 4"));
    }

    #[test]
    fn plan_serde_round_trip() {
        let role = RoleProfile {
            id: "r1".into(),
            name: "影评分析师".into(),
            description: "镜头语言专家".into(),
            capabilities: vec!["镜头分析".into()],
            focus_areas: vec!["长镜头".into()],
            expertise_level: "expert".into(),
            work_objective: "分析镜头语言".into(),
            deliverables: vec!["分析报告".into()],
            methodology: Some(WorkMethodology {
                approach: "系统分析".into(),
                steps: vec!["step".into()],
                ..Default::default()
            }),
            assigned_skills: vec![SkillAssignment {
                skill_name: "reasoning".into(),
                skill_display_name: "推理分析".into(),
                reason: "深度分析".into(),
            }],
            system_prompt: "你是影评分析师".into(),
            relay_triggers: vec!["发现关键信息".into()],
            emergence_reasoning: String::new(),
        };
        let plan = TaskPlan {
            id: "p1".into(),
            original_task: "分析电影".into(),
            analysis: "需要多角度".into(),
            workers: vec![WorkerSpec::new(role, "分析镜头")],
            stations: vec![Station::new("阶段1中继站", 1)],
            phases: vec![PlanPhase {
                phase_number: 1,
                name: "执行阶段".into(),
                ..Default::default()
            }],
            estimated_duration_seconds: 300,
            integration_strategy: "统筹整合".into(),
        };
        let json = serde_json::to_string(&plan).unwrap();
        let parsed: TaskPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plan);
    }
}
