//! Wire event model.
//!
//! Every observable moment of a run is one [`SwarmEvent`] wrapped in an
//! [`EventEnvelope`] carrying the emission timestamp. Envelopes serialize
//! to a single JSON object tagged by `type` and render to the line-oriented
//! stream framing (`event: <TYPE>` + one `data:` JSON line + blank line).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    Intervention, InterventionKind, PlanPhase, RelayMessage, RoleProfile, WorkerStatus,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationParticipant {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SwarmEvent {
    // ── Lifecycle ─────────────────────────────────────────────────
    #[serde(rename = "RUN_STARTED")]
    RunStarted { thread_id: String, run_id: String },
    #[serde(rename = "RUN_FINISHED")]
    RunFinished { thread_id: String, run_id: String },
    #[serde(rename = "RUN_ERROR")]
    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    // ── Text stream ───────────────────────────────────────────────
    #[serde(rename = "TEXT_MESSAGE_START")]
    TextMessageStart { message_id: String, role: String },
    #[serde(rename = "TEXT_MESSAGE_CONTENT")]
    TextMessageContent { message_id: String, delta: String },
    #[serde(rename = "TEXT_MESSAGE_END")]
    TextMessageEnd { message_id: String },

    // ── Tool calls ────────────────────────────────────────────────
    #[serde(rename = "TOOL_CALL_START")]
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    #[serde(rename = "TOOL_CALL_ARGS")]
    ToolCallArgs { tool_call_id: String, delta: String },
    #[serde(rename = "TOOL_CALL_END")]
    ToolCallEnd { tool_call_id: String },
    #[serde(rename = "TOOL_CALL_RESULT")]
    ToolCallResult { tool_call_id: String, result: String },

    // ── State management ──────────────────────────────────────────
    #[serde(rename = "STATE_SNAPSHOT")]
    StateSnapshot { snapshot: serde_json::Value },

    // ── Agent lifecycle ───────────────────────────────────────────
    #[serde(rename = "AGENT_SPAWNED")]
    AgentSpawned {
        agent_id: String,
        agent_name: String,
        role: RoleProfile,
        task_segment: String,
    },
    #[serde(rename = "AGENT_STATUS_CHANGED")]
    AgentStatusChanged {
        agent_id: String,
        agent_name: String,
        previous_status: WorkerStatus,
        new_status: WorkerStatus,
    },
    #[serde(rename = "AGENT_PROGRESS")]
    AgentProgress {
        agent_id: String,
        agent_name: String,
        progress: f32,
        current_step: String,
        iterations: u32,
    },
    #[serde(rename = "AGENT_THINKING")]
    AgentThinking {
        agent_id: String,
        agent_name: String,
        thinking: String,
    },

    // ── Relay ─────────────────────────────────────────────────────
    #[serde(rename = "RELAY_STATION_OPENED")]
    RelayStationOpened {
        station_id: String,
        station_name: String,
        phase: u32,
        participating_agents: Vec<StationParticipant>,
    },
    #[serde(rename = "RELAY_MESSAGE_SENT")]
    RelayMessageSent {
        station_id: String,
        message: RelayMessage,
    },
    #[serde(rename = "RELAY_STATION_CLOSED")]
    RelayStationClosed {
        station_id: String,
        station_name: String,
        summary: String,
    },

    // ── Planning ──────────────────────────────────────────────────
    #[serde(rename = "PLAN_GENERATED")]
    PlanGenerated {
        plan_id: String,
        original_task: String,
        analysis: String,
        phases: Vec<PlanPhase>,
        estimated_duration_seconds: u64,
        total_agents: u32,
    },
    #[serde(rename = "ROLE_EMERGED")]
    RoleEmerged {
        role_id: String,
        role_name: String,
        description: String,
        capabilities: Vec<String>,
        focus_areas: Vec<String>,
        reasoning: String,
    },

    // ── Interventions ─────────────────────────────────────────────
    #[serde(rename = "INTERVENTION_REQUESTED")]
    InterventionRequested { intervention: Intervention },
    #[serde(rename = "INTERVENTION_APPLIED")]
    InterventionApplied {
        intervention_id: String,
        kind: InterventionKind,
        target_ids: Vec<String>,
    },
    #[serde(rename = "INTERVENTION_BROADCAST")]
    InterventionBroadcast {
        intervention_id: String,
        message_id: String,
        target_ids: Vec<String>,
    },

    // ── Session ───────────────────────────────────────────────────
    #[serde(rename = "SESSION_CREATED")]
    SessionCreated { session_id: String },
    #[serde(rename = "SESSION_STATE_CHANGED")]
    SessionStateChanged {
        session_id: String,
        change_type: String,
        summary: serde_json::Value,
    },

    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

impl SwarmEvent {
    /// The wire name, identical to the serde tag.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::AgentSpawned { .. } => "AGENT_SPAWNED",
            Self::AgentStatusChanged { .. } => "AGENT_STATUS_CHANGED",
            Self::AgentProgress { .. } => "AGENT_PROGRESS",
            Self::AgentThinking { .. } => "AGENT_THINKING",
            Self::RelayStationOpened { .. } => "RELAY_STATION_OPENED",
            Self::RelayMessageSent { .. } => "RELAY_MESSAGE_SENT",
            Self::RelayStationClosed { .. } => "RELAY_STATION_CLOSED",
            Self::PlanGenerated { .. } => "PLAN_GENERATED",
            Self::RoleEmerged { .. } => "ROLE_EMERGED",
            Self::InterventionRequested { .. } => "INTERVENTION_REQUESTED",
            Self::InterventionApplied { .. } => "INTERVENTION_APPLIED",
            Self::InterventionBroadcast { .. } => "INTERVENTION_BROADCAST",
            Self::SessionCreated { .. } => "SESSION_CREATED",
            Self::SessionStateChanged { .. } => "SESSION_STATE_CHANGED",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    /// Status transitions, errors and results must reach subscribers ahead
    /// of thinking/progress bursts (the orchestrator's priority channel).
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            Self::AgentStatusChanged { .. } | Self::RunError { .. } | Self::RunFinished { .. }
        )
    }

    /// Event kinds whose durable record must never lag the client-visible
    /// stream: persisted synchronously before fan-out.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::AgentSpawned { .. }
                | Self::AgentStatusChanged { .. }
                | Self::PlanGenerated { .. }
                | Self::RelayStationOpened { .. }
                | Self::RelayMessageSent { .. }
                | Self::RunFinished { .. }
                | Self::RunError { .. }
        )
    }

    pub fn into_envelope(self) -> EventEnvelope {
        EventEnvelope {
            event: self,
            timestamp: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope and framing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A [`SwarmEvent`] plus its emission timestamp; the unit that flows
/// through subscriber queues and onto the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: SwarmEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Render the textual stream frame:
    /// `event: <TYPE>\ndata: <single-line JSON>\n\n`.
    pub fn to_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to serialize event envelope");
            String::from("{}")
        });
        format!("event: {}\ndata: {data}\n\n", self.event.event_name())
    }
}

/// A comment frame (`: <text>\n\n`). Receivers must treat these as
/// keep-alives.
pub fn comment_frame(text: &str) -> String {
    format!(": {text}\n\n")
}
