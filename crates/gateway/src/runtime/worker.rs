//! Worker runtime — the cooperative per-worker loop.
//!
//! Entry point: [`WorkerRuntime::run`] consumes the runtime and drives the
//! iteration loop, sending [`WorkerSignal`]s over the priority/normal
//! channel pair the orchestrator merges. Each iteration: drain direct
//! injections and the relay inbox, tick progress, run the tool-call
//! subloop plus a final streaming pass, then decide between completion,
//! relay emission, and a continuation prompt.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;

use sg_domain::model::{
    truncate_chars, InterventionKind, RelayKind, RelayMessage, WorkerSpec, WorkerState,
    WorkerStatus,
};
use sg_domain::stream::StreamEvent;
use sg_domain::tool::{Message, ToolCall};
use sg_providers::{ChatRequest, LlmProvider};
use sg_skills::{SkillExecutor, SkillInvocation, SkillOutcome, SkillRegistry};

use super::control::ControlFlags;
use super::prompts;
use super::relay::{RelayCoordinator, RelayEnvelope};
use super::triggers::TriggerScanner;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
const MAX_TOOL_ROUNDS: usize = 3;
const PAUSE_POLL: Duration = Duration::from_millis(500);

/// Strict completion markers; any one of these ends the worker.
const COMPLETION_MARKERS: [&str; 4] =
    ["[任务完成]", "[TASK_COMPLETE]", "**任务完成**", "## 任务完成"];

/// Conclusion cues for the relaxed completion path (iterations ≥ 3 and a
/// substantial response).
const CONCLUSION_CUES: [&str; 5] = ["综上所述", "总结如下", "最终结论", "分析报告", "完整分析结果"];

/// Phrases by which a worker's own text acknowledges pending
/// interventions, relaxing a completion block.
const ACK_PHRASES: [&str; 6] = [
    "已收到",
    "收到干预通知",
    "已整合中继信息",
    "已考虑人工干预",
    "已根据干预调整",
    "已确认收到",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Internal worker → orchestrator event.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Status {
        previous: WorkerStatus,
        status: WorkerStatus,
    },
    Progress {
        progress: f32,
        step: String,
        iterations: u32,
    },
    Thinking {
        delta: String,
    },
    ToolCallStart {
        call_id: String,
        tool_name: String,
    },
    ToolCallResult {
        call_id: String,
        tool_name: String,
        success: bool,
        summary: String,
        result_preview: String,
    },
    CompletionBlocked {
        pending_total: usize,
        unacknowledged: usize,
    },
    Result {
        final_result: String,
    },
    Error {
        message: String,
    },
}

impl WorkerEvent {
    /// Status transitions, errors and results go through the priority
    /// channel so they are never stuck behind thinking bursts.
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            Self::Status { .. } | Self::Error { .. } | Self::Result { .. }
        )
    }
}

/// A worker event tagged with its origin.
#[derive(Debug, Clone)]
pub struct WorkerSignal {
    pub worker_id: String,
    pub worker_name: String,
    pub event: WorkerEvent,
}

/// The two outbound channels a worker writes to.
#[derive(Clone)]
pub struct WorkerTx {
    pub priority: mpsc::UnboundedSender<WorkerSignal>,
    pub normal: mpsc::UnboundedSender<WorkerSignal>,
}

impl WorkerTx {
    fn send(&self, worker_id: &str, worker_name: &str, event: WorkerEvent) {
        let signal = WorkerSignal {
            worker_id: worker_id.to_owned(),
            worker_name: worker_name.to_owned(),
            event,
        };
        let channel = if signal.event.is_priority() {
            &self.priority
        } else {
            &self.normal
        };
        if channel.send(signal).is_err() {
            tracing::debug!(worker_id, "worker event channel closed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending-message bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct PendingIntervention {
    kind: Option<InterventionKind>,
    priority: u8,
    preview: String,
}

/// Snapshot of the queued-but-unprocessed inbox, inspected at completion
/// time.
#[derive(Debug, Clone, Default)]
struct PendingSummary {
    total_count: usize,
    intervention_count: usize,
    high_priority_count: usize,
    unacknowledged_count: usize,
    requires_response: bool,
    interventions: Vec<PendingIntervention>,
}

impl PendingSummary {
    /// The conditions that block completion: a queued intervention of
    /// priority ≥ 7, an unsettled acknowledgement, a message demanding a
    /// response, or a queued inject/adjust directive.
    fn blocks_completion(&self) -> bool {
        self.unacknowledged_count > 0
            || self.requires_response
            || self.interventions.iter().any(|i| {
                i.priority >= 7
                    || matches!(
                        i.kind,
                        Some(InterventionKind::Inject) | Some(InterventionKind::Adjust)
                    )
            })
    }

    fn has_pending(&self) -> bool {
        self.total_count > 0 || self.unacknowledged_count > 0
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkerRuntime {
    spec: WorkerSpec,
    max_iterations: u32,
    provider: Arc<dyn LlmProvider>,
    skills: Arc<SkillRegistry>,
    executor: Arc<dyn SkillExecutor>,
    relay: Arc<RelayCoordinator>,
    controls: ControlFlags,
    inbox: mpsc::UnboundedReceiver<RelayEnvelope>,
    inject_rx: mpsc::UnboundedReceiver<String>,
    /// Envelopes pulled off the inbox but not yet folded into the log.
    staged: VecDeque<RelayEnvelope>,
    /// Intervention message ids awaiting acknowledgement in output.
    pending_acks: Vec<String>,
    log: Vec<Message>,
    state: WorkerState,
    tool_defs: Vec<sg_domain::tool::ToolDefinition>,
    scanner: TriggerScanner,
    user_memory: String,
    tool_timeout: Duration,
    detect_timeout: Duration,
}

impl WorkerRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: WorkerSpec,
        provider: Arc<dyn LlmProvider>,
        skills: Arc<SkillRegistry>,
        executor: Arc<dyn SkillExecutor>,
        relay: Arc<RelayCoordinator>,
        controls: ControlFlags,
        inbox: mpsc::UnboundedReceiver<RelayEnvelope>,
        inject_rx: mpsc::UnboundedReceiver<String>,
        user_memory: String,
    ) -> Self {
        let assigned: Vec<String> = spec
            .role
            .assigned_skills
            .iter()
            .map(|s| s.skill_name.clone())
            .collect();
        let tool_defs = skills.tool_definitions(&assigned);
        let state = WorkerState::new(&spec.id, &spec.role.name);

        Self {
            spec,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            provider,
            skills,
            executor,
            relay,
            controls,
            inbox,
            inject_rx,
            staged: VecDeque::new(),
            pending_acks: Vec::new(),
            log: Vec::new(),
            state,
            tool_defs,
            scanner: TriggerScanner::new(),
            user_memory,
            tool_timeout: Duration::from_secs(45),
            detect_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.spec.id
    }

    // ── Main loop ─────────────────────────────────────────────────

    pub async fn run(mut self, tx: WorkerTx) -> WorkerState {
        self.set_status(WorkerStatus::Running, &tx);
        self.init_log();

        let mut completed = false;

        while self.state.iterations < self.max_iterations {
            if self.controls.is_cancelled() {
                self.set_status(WorkerStatus::Cancelled, &tx);
                return self.state;
            }
            if self.controls.is_paused() {
                if self.state.status != WorkerStatus::Paused {
                    self.set_status(WorkerStatus::Paused, &tx);
                }
                tokio::time::sleep(PAUSE_POLL).await;
                continue;
            }
            if self.state.status == WorkerStatus::Paused {
                self.set_status(WorkerStatus::Running, &tx);
            }

            self.state.iterations += 1;
            let iteration = self.state.iterations;

            // 1. Direct injections first, then the relay inbox.
            self.drain_injections();
            self.pull_inbox();
            self.fold_staged_into_log();

            // 2. Progress tick.
            let progress =
                (iteration as f32 / self.max_iterations as f32 * 100.0).min(95.0);
            self.state
                .set_progress(progress, format!("迭代 {iteration}/{}", self.max_iterations));
            tx.send(
                &self.spec.id,
                &self.spec.role.name,
                WorkerEvent::Progress {
                    progress,
                    step: self.state.current_step.clone(),
                    iterations: iteration,
                },
            );

            // 3. LLM call with tool subloop.
            let response = match self.run_iteration(&tx).await {
                Ok(text) => text,
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        worker_id = %self.spec.id,
                        iteration,
                        error = %message,
                        "worker iteration failed"
                    );
                    self.state.error = Some(message.clone());
                    tx.send(
                        &self.spec.id,
                        &self.spec.role.name,
                        WorkerEvent::Error { message },
                    );
                    self.set_status(WorkerStatus::Failed, &tx);
                    return self.state;
                }
            };

            // An acknowledging response settles pending interventions
            // whether or not the worker is done.
            if contains_ack_phrase(&response) {
                self.settle_acknowledgements();
            }

            // 4. Completion decision.
            if self.is_task_complete(&response) {
                self.pull_inbox();
                let pending = self.pending_summary();
                if pending.has_pending()
                    && pending.blocks_completion()
                    && !contains_ack_phrase(&response)
                {
                    tx.send(
                        &self.spec.id,
                        &self.spec.role.name,
                        WorkerEvent::CompletionBlocked {
                            pending_total: pending.total_count,
                            unacknowledged: pending.unacknowledged_count,
                        },
                    );
                    self.log
                        .push(Message::user(self.build_pending_block_prompt(&pending)));
                    continue;
                }

                self.settle_acknowledgements();
                // Status first so subscribers see the transition without
                // waiting on result extraction.
                self.set_status(WorkerStatus::Completed, &tx);
                let final_result = extract_final_result(&response);
                self.state.final_result = Some(final_result.clone());
                tx.send(
                    &self.spec.id,
                    &self.spec.role.name,
                    WorkerEvent::Result { final_result },
                );
                completed = true;
                break;
            }

            // 5. Self-triggered relay.
            if self.spec.relay_enabled {
                self.check_relay_trigger(&response);
            }

            // 6. Continuation prompt for the next round.
            if iteration < self.max_iterations {
                self.pull_inbox();
                let pending = self.pending_summary();
                self.log.push(Message::user(
                    self.build_continuation_prompt(iteration, &pending),
                ));
            }
        }

        if !completed && !self.state.status.is_terminal() {
            // Iteration budget exhausted: finish with what was produced.
            if self.state.final_result.is_none() {
                self.state.final_result = Some(self.state.partial_result.clone());
            }
            self.set_status(WorkerStatus::Completed, &tx);
            tx.send(
                &self.spec.id,
                &self.spec.role.name,
                WorkerEvent::Result {
                    final_result: self.state.final_result.clone().unwrap_or_default(),
                },
            );
        }
        self.state.set_progress(100.0, "完成");
        self.state
    }

    // ── Iteration internals ───────────────────────────────────────

    fn init_log(&mut self) {
        self.log = vec![
            Message::system(prompts::build_worker_system_prompt(
                &self.spec.role,
                &self.user_memory,
            )),
            Message::user(prompts::build_task_prompt(
                &self.spec.role,
                &self.spec.task_segment,
            )),
        ];
    }

    /// One iteration: up to [`MAX_TOOL_ROUNDS`] tool-detection rounds, then
    /// a final free-form streaming call whose tokens are forwarded as
    /// thinking deltas.
    async fn run_iteration(&mut self, tx: &WorkerTx) -> sg_domain::error::Result<String> {
        if !self.tool_defs.is_empty() {
            for round in 0..MAX_TOOL_ROUNDS {
                let req = ChatRequest::new(self.log.clone()).with_tools(self.tool_defs.clone());
                let detected = match tokio::time::timeout(
                    self.detect_timeout,
                    self.provider.detect_tool_calls(&req),
                )
                .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        tracing::warn!(
                            worker_id = %self.spec.id,
                            round,
                            "tool detection timed out, finalizing without tools"
                        );
                        tx.send(
                            &self.spec.id,
                            &self.spec.role.name,
                            WorkerEvent::Thinking {
                                delta: "工具检测达到时限，先基于已有信息继续生成完整结论。".into(),
                            },
                        );
                        break;
                    }
                };

                if detected.tool_calls.is_empty() {
                    break;
                }

                if !detected.content.is_empty() {
                    tx.send(
                        &self.spec.id,
                        &self.spec.role.name,
                        WorkerEvent::Thinking {
                            delta: detected.content.clone(),
                        },
                    );
                }

                self.log.push(Message::assistant_with_tool_calls(
                    &detected.content,
                    &detected.tool_calls,
                ));

                for call in &detected.tool_calls {
                    self.execute_tool_call(call, tx).await;
                }
            }
        }

        // Final free-form pass, streamed.
        let req = ChatRequest::new(self.log.clone());
        let mut stream = self.provider.chat_stream(&req).await?;
        let mut full = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    full.push_str(&text);
                    tx.send(
                        &self.spec.id,
                        &self.spec.role.name,
                        WorkerEvent::Thinking { delta: text },
                    );
                }
                StreamEvent::Thinking { text } => {
                    tx.send(
                        &self.spec.id,
                        &self.spec.role.name,
                        WorkerEvent::Thinking { delta: text },
                    );
                }
                StreamEvent::Error { message } => {
                    return Err(sg_domain::error::Error::Provider {
                        provider: self.provider.provider_id().into(),
                        message,
                    });
                }
                StreamEvent::Done { .. } => break,
                _ => {}
            }
        }

        self.log.push(Message::assistant(&full));
        self.state.thinking = full.clone();
        self.state.partial_result = full.clone();
        Ok(full)
    }

    /// Execute one tool call with the per-call timeout; failures become
    /// failure outcomes in the log, never worker errors.
    async fn execute_tool_call(&mut self, call: &ToolCall, tx: &WorkerTx) {
        tx.send(
            &self.spec.id,
            &self.spec.role.name,
            WorkerEvent::ToolCallStart {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            },
        );

        let invocation = build_invocation(call);
        let outcome = if !self.skills.contains(&call.tool_name) {
            SkillOutcome::failure(format!("unknown skill: {}", call.tool_name))
        } else {
            match tokio::time::timeout(self.tool_timeout, self.executor.execute(&invocation)).await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => SkillOutcome::failure(e.to_string()),
                Err(_) => SkillOutcome::failure(format!(
                    "skill '{}' timed out after {}s",
                    call.tool_name,
                    self.tool_timeout.as_secs()
                )),
            }
        };

        tx.send(
            &self.spec.id,
            &self.spec.role.name,
            WorkerEvent::ToolCallResult {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                success: outcome.success,
                summary: outcome.summary.clone(),
                result_preview: truncate_chars(&outcome.result, 500),
            },
        );

        self.log.push(Message::tool_result(
            &call.call_id,
            compact_tool_result(&outcome),
        ));
    }

    // ── Inbox handling ────────────────────────────────────────────

    fn drain_injections(&mut self) {
        while let Ok(information) = self.inject_rx.try_recv() {
            self.log
                .push(Message::user(prompts::build_injection_prompt(&information)));
            self.state.injected_info_count += 1;
            tracing::debug!(
                worker_id = %self.spec.id,
                total = self.state.injected_info_count,
                "operator information injected"
            );
        }
    }

    fn pull_inbox(&mut self) {
        while let Ok(envelope) = self.inbox.try_recv() {
            self.relay.mark_viewed(&envelope.message.id, &self.spec.id);
            self.state.relay_messages_received += 1;
            self.staged.push_back(envelope);
        }
    }

    /// Fold staged envelopes into the log: interventions first (descending
    /// importance), then regular relay, each with its kind-specific prompt
    /// shape.
    fn fold_staged_into_log(&mut self) {
        if self.staged.is_empty() {
            return;
        }

        let mut interventions: Vec<RelayMessage> = Vec::new();
        let mut regular: Vec<RelayMessage> = Vec::new();
        for envelope in self.staged.drain(..) {
            let mut message = envelope.message;
            if message.kind == RelayKind::HumanIntervention {
                if message.requires_acknowledgement() {
                    self.pending_acks.push(message.id.clone());
                }
                if message.intervention_kind() == Some(InterventionKind::Adjust) {
                    message.raise_importance(0.9);
                }
                interventions.push(message);
            } else {
                regular.push(message);
            }
        }

        interventions.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for message in interventions {
            self.log
                .push(Message::user(prompts::build_intervention_prompt(&message)));
        }
        for message in regular {
            self.log
                .push(Message::user(prompts::build_inbox_prompt(&message)));
        }
    }

    fn pending_summary(&self) -> PendingSummary {
        let mut summary = PendingSummary {
            unacknowledged_count: self.pending_acks.len(),
            total_count: self.staged.len(),
            ..Default::default()
        };

        for envelope in &self.staged {
            let message = &envelope.message;
            if message.kind == RelayKind::HumanIntervention {
                summary.intervention_count += 1;
                let priority = message.intervention_priority();
                if priority >= 7 {
                    summary.high_priority_count += 1;
                    summary.requires_response = true;
                }
                summary.interventions.push(PendingIntervention {
                    kind: message.intervention_kind(),
                    priority,
                    preview: truncate_chars(&message.content, 100),
                });
            } else if message.importance >= 0.8 {
                summary.high_priority_count += 1;
            }
            if message.requires_response() {
                summary.requires_response = true;
            }
        }

        summary
    }

    /// Acknowledge everything pending against the coordinator and clear
    /// the local set.
    fn settle_acknowledgements(&mut self) {
        for message_id in self.pending_acks.drain(..) {
            self.relay.acknowledge(&message_id, &self.spec.id);
        }
    }

    // ── Completion ────────────────────────────────────────────────

    fn is_task_complete(&self, response: &str) -> bool {
        if COMPLETION_MARKERS.iter().any(|m| response.contains(m)) {
            return true;
        }
        if self.state.iterations >= 3 {
            let has_conclusion = CONCLUSION_CUES.iter().any(|c| response.contains(c));
            let is_substantial = response.chars().count() > 800;
            if has_conclusion && is_substantial {
                return true;
            }
        }
        false
    }

    // ── Relay emission ────────────────────────────────────────────

    fn check_relay_trigger(&mut self, response: &str) -> Option<RelayMessage> {
        let hit = self.scanner.scan(response, self.state.iterations)?;

        let message = RelayMessage::new(
            hit.kind,
            &self.spec.id,
            &self.spec.role.name,
            Vec::new(),
            truncate_chars(&hit.content, 1000),
            0.8,
        )
        .with_metadata("reason", serde_json::json!(hit.reason))
        .with_metadata("iteration", serde_json::json!(self.state.iterations));

        self.state.relay_messages_sent += 1;
        Some(self.relay.broadcast_message(message, None))
    }

    // ── Prompt builders on worker state ───────────────────────────

    fn build_continuation_prompt(&self, iteration: u32, pending: &PendingSummary) -> String {
        let mut parts: Vec<String> = Vec::new();

        if pending.total_count > 0 {
            parts.push("⚠️ **注意：中继站有待处理的消息**".into());
            parts.push(String::new());
            if pending.intervention_count > 0 {
                parts.push(format!("- 人工干预消息: {} 条", pending.intervention_count));
                for intervention in &pending.interventions {
                    parts.push(format!(
                        "  - 类型: {}, 优先级: {}",
                        intervention
                            .kind
                            .map(|k| k.as_str())
                            .unwrap_or("unknown"),
                        intervention.priority
                    ));
                }
            }
            let other = pending.total_count - pending.intervention_count;
            if other > 0 {
                parts.push(format!("- 其他中继消息: {other} 条"));
            }
            parts.push(String::new());
            parts.push("请先处理这些消息后再继续你的分析。".into());
            parts.push(String::new());
            parts.push("---".into());
            parts.push(String::new());
        }

        match iteration {
            1 => {
                parts.push("你的初步分析很好。现在请：".into());
                parts.push("1. 针对你提到的关键点，进行更深入的分析".into());
                parts.push("2. 考虑是否有遗漏的角度或维度".into());
                parts.push("3. 如果有重要发现，请用 **[关键发现]** 标记".into());
                parts.push(String::new());
                parts.push("继续深入分析：".into());
            }
            2 => {
                parts.push("分析正在深入。请：".into());
                parts.push("1. 思考你的发现之间有什么关联或模式".into());
                parts.push(
                    "2. 是否有需要与其他专家角色协作确认的问题？如有，请用 **[请求中继: 原因]** 标记"
                        .into(),
                );
                parts.push("3. 继续挖掘潜在的洞察".into());
                parts.push(String::new());
                parts.push("继续分析：".into());
            }
            3 => {
                parts.push("分析已经比较深入。请：".into());
                parts.push("1. 尝试整合你的各项发现".into());
                parts.push("2. 形成初步的结论框架".into());
                parts.push(
                    "3. 如果你认为分析已经完整，可以用 **[任务完成]** 标记并给出完整结论".into(),
                );
                parts.push(String::new());
                parts.push("继续：".into());
            }
            _ => {
                parts.push(
                    "请继续你的分析，如果你认为已经足够深入和完整，请用 **[任务完成]** 标记并给出最终分析结果。"
                        .into(),
                );
                parts.push(String::new());
                parts.push("继续：".into());
            }
        }

        parts.join("\n")
    }

    fn build_pending_block_prompt(&self, pending: &PendingSummary) -> String {
        let mut parts = vec![
            "⚠️ **任务完成被阻止**".to_string(),
            String::new(),
            "在标记任务完成之前，你需要先处理中继站中的待处理消息：".to_string(),
            String::new(),
        ];

        if pending.intervention_count > 0 {
            parts.push(format!(
                "📢 **人工干预消息** ({} 条):",
                pending.intervention_count
            ));
            for (i, intervention) in pending.interventions.iter().enumerate() {
                parts.push(format!(
                    "  {}. 类型: {}",
                    i + 1,
                    intervention.kind.map(|k| k.as_str()).unwrap_or("unknown")
                ));
                parts.push(format!("     优先级: {}/10", intervention.priority));
                parts.push(format!("     内容预览: {}...", intervention.preview));
            }
            parts.push(String::new());
        }

        if pending.unacknowledged_count > 0 {
            parts.push(format!(
                "❗ **未确认的干预消息**: {} 条",
                pending.unacknowledged_count
            ));
            parts.push(String::new());
        }

        let other = pending.total_count.saturating_sub(pending.intervention_count);
        if other > 0 {
            parts.push(format!("💬 **其他中继消息**: {other} 条"));
            parts.push(String::new());
        }

        parts.push("---".into());
        parts.push(String::new());
        parts.push("**请按以下步骤处理**：".into());
        parts.push("1. 仔细阅读上述待处理消息的内容".into());
        parts.push("2. 根据消息内容调整你的分析或结论".into());
        parts.push("3. 如果收到人工干预，请明确确认：「已收到干预通知，内容是...」".into());
        parts.push("4. 处理完所有消息后，再考虑是否可以完成任务".into());
        parts.push(String::new());
        parts.push("请处理这些消息并给出你的响应：".into());

        parts.join("\n")
    }

    fn set_status(&mut self, status: WorkerStatus, tx: &WorkerTx) {
        let previous = self.state.status;
        self.state.set_status(status);
        tx.send(
            &self.spec.id,
            &self.spec.role.name,
            WorkerEvent::Status { previous, status },
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn contains_ack_phrase(response: &str) -> bool {
    ACK_PHRASES.iter().any(|p| response.contains(p))
}

/// The final result is everything from the completion marker on; without
/// a marker, the whole response.
fn extract_final_result(response: &str) -> String {
    for marker in ["[任务完成]", "[TASK_COMPLETE]"] {
        if let Some(idx) = response.find(marker) {
            return response[idx..].trim().to_string();
        }
    }
    response.trim().to_string()
}

/// Build the executor invocation from a tool call: natural-language task
/// plus the skill-specific script argv. Shared with direct mode.
pub(crate) fn build_invocation(call: &ToolCall) -> SkillInvocation {
    let args = call.arguments.as_object();
    let task = args
        .and_then(|a| {
            a.get("task")
                .or_else(|| a.get("query"))
                .and_then(|v| v.as_str())
        })
        .map(String::from)
        .unwrap_or_else(|| call.arguments.to_string());

    SkillInvocation {
        skill_name: call.tool_name.clone(),
        task: task.clone(),
        script_args: build_script_args(&call.tool_name, &task, &call.arguments),
    }
}

/// The web-search script speaks a `--query`-style CLI contract; all other
/// script skills take a plain `--task`.
fn build_script_args(skill_name: &str, task: &str, arguments: &serde_json::Value) -> Vec<String> {
    let mut args = Vec::new();
    if skill_name == "web_search" || skill_name == "web-search" {
        args.push("--query".into());
        args.push(task.to_string());
        for (key, flag) in [
            ("max_results", "--max-results"),
            ("type", "--type"),
            ("region", "--region"),
            ("time_range", "--time-range"),
        ] {
            if let Some(value) = arguments.get(key) {
                args.push(flag.into());
                args.push(match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        }
        args.push("--format".into());
        args.push("json".into());
    } else {
        args.push("--task".into());
        args.push(task.to_string());
    }
    args
}

/// Compact JSON for the worker's log, bounding context growth.
fn compact_tool_result(outcome: &SkillOutcome) -> String {
    let compact = serde_json::json!({
        "success": outcome.success,
        "summary": outcome.summary,
        "result_preview": truncate_chars(&outcome.result, 1200),
        "error": outcome.error,
    });
    compact.to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use sg_domain::event::SwarmEvent;
    use sg_domain::model::{
        Intervention, InterventionScope, RoleProfile, SkillAssignment,
    };
    use sg_providers::{ChatResponse, MockProvider};
    use sg_skills::{PromptModeExecutor, ScriptRunner, SkillSpec};

    struct Harness {
        relay: Arc<RelayCoordinator>,
        controls: ControlFlags,
        provider: Arc<MockProvider>,
        inject_tx: mpsc::UnboundedSender<String>,
        worker: WorkerRuntime,
        priority_rx: mpsc::UnboundedReceiver<WorkerSignal>,
        normal_rx: mpsc::UnboundedReceiver<WorkerSignal>,
        tx: WorkerTx,
        _relay_events: mpsc::UnboundedReceiver<SwarmEvent>,
    }

    fn role(with_skill: bool) -> RoleProfile {
        RoleProfile {
            id: "r1".into(),
            name: "影评分析师".into(),
            description: "镜头语言专家".into(),
            capabilities: vec![],
            focus_areas: vec![],
            expertise_level: "expert".into(),
            work_objective: "分析镜头".into(),
            deliverables: vec![],
            methodology: None,
            assigned_skills: if with_skill {
                vec![SkillAssignment {
                    skill_name: "reasoning".into(),
                    skill_display_name: "推理分析".into(),
                    reason: "深度分析".into(),
                }]
            } else {
                vec![]
            },
            system_prompt: "你是资深影评人。".into(),
            relay_triggers: vec!["发现关键信息".into()],
            emergence_reasoning: String::new(),
        }
    }

    fn harness(scripts: Vec<ChatResponse>, with_skill: bool) -> Harness {
        let (relay_events_tx, relay_events_rx) = mpsc::unbounded_channel();
        let relay = Arc::new(RelayCoordinator::new("sess", relay_events_tx));
        let provider = Arc::new(MockProvider::new(scripts));
        let skills = Arc::new(SkillRegistry::builtin());
        let executor = Arc::new(PromptModeExecutor::new(skills.clone()));
        let controls = ControlFlags::new();

        let mut spec = WorkerSpec::new(role(with_skill), "分析《电影X》的镜头语言");
        spec.id = "w1".into();

        // Interventions flow through the plain inbox here so the single
        // receiver the worker holds observes everything.
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        relay.register_worker(
            "w1",
            super::super::relay::WorkerPorts {
                inbox: inbox_tx,
                intervention: None,
                inject: Some(inject_tx.clone()),
            },
        );

        let worker = WorkerRuntime::new(
            spec,
            provider.clone(),
            skills,
            executor,
            relay.clone(),
            controls.clone(),
            inbox_rx,
            inject_rx,
            String::new(),
        )
        .with_max_iterations(4);

        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();

        Harness {
            relay,
            controls,
            provider,
            inject_tx,
            worker,
            priority_rx,
            normal_rx,
            tx: WorkerTx {
                priority: priority_tx,
                normal: normal_tx,
            },
            _relay_events: relay_events_rx,
        }
    }

    fn long_completion() -> String {
        format!("[任务完成]\n## 分析结论\n{}", "镜头语言分析。".repeat(80))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerSignal>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            events.push(signal.event);
        }
        events
    }

    #[tokio::test]
    async fn completes_on_strict_marker() {
        let mut h = harness(vec![ChatResponse::text(long_completion())], false);
        let state = h.worker.run(h.tx.clone()).await;

        assert_eq!(state.status, WorkerStatus::Completed);
        assert_eq!(state.iterations, 1);
        assert!(state.final_result.unwrap().starts_with("[任务完成]"));

        let priority = drain(&mut h.priority_rx);
        // running → completed → result, in order.
        assert!(matches!(
            priority[0],
            WorkerEvent::Status {
                status: WorkerStatus::Running,
                ..
            }
        ));
        assert!(matches!(
            priority[1],
            WorkerEvent::Status {
                status: WorkerStatus::Completed,
                ..
            }
        ));
        assert!(matches!(priority[2], WorkerEvent::Result { .. }));
    }

    #[tokio::test]
    async fn tool_subloop_executes_skill_then_streams_final() {
        let h = harness(vec![], true);
        // Round 1: tool call; round 2: no tools; final: streamed completion.
        h.provider
            .push_tool_call("c1", "reasoning", serde_json::json!({"task": "分析节奏"}));
        h.provider.push_text("");
        h.provider.push_text(long_completion());

        let mut h = h;
        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);

        let normal = drain(&mut h.normal_rx);
        let starts: Vec<_> = normal
            .iter()
            .filter(|e| matches!(e, WorkerEvent::ToolCallStart { .. }))
            .collect();
        assert_eq!(starts.len(), 1);
        let results: Vec<_> = normal
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::ToolCallResult { success, .. } => Some(*success),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec![true]);
    }

    #[tokio::test]
    async fn unknown_tool_fails_in_result_but_worker_continues() {
        let h = harness(vec![], true);
        h.provider
            .push_tool_call("c1", "no_such_skill", serde_json::json!({"task": "x"}));
        h.provider.push_text("");
        h.provider.push_text(long_completion());

        let mut h = h;
        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);

        let normal = drain(&mut h.normal_rx);
        assert!(normal.iter().any(|e| matches!(
            e,
            WorkerEvent::ToolCallResult { success: false, .. }
        )));
    }

    #[tokio::test]
    async fn completion_blocked_until_acknowledged() {
        let mut h = harness(
            vec![
                // Iteration 1: tries to complete without acknowledging.
                ChatResponse::text(long_completion()),
                // Iteration 2: acknowledges and completes.
                ChatResponse::text(format!("已收到干预通知，将整合注入信息。\n{}", long_completion())),
            ],
            false,
        );

        let msg = h.relay.broadcast_intervention(
            Intervention::new(InterventionKind::Inject, InterventionScope::Single, 8)
                .with_target("w1")
                .with_payload("information", serde_json::json!("重点关注长镜头")),
        );

        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);
        assert_eq!(state.iterations, 2);

        let normal = drain(&mut h.normal_rx);
        assert!(normal
            .iter()
            .any(|e| matches!(e, WorkerEvent::CompletionBlocked { .. })));

        // The acknowledgement reached the coordinator's copy.
        let stored = h.relay.get_message(&msg.id).unwrap();
        assert!(stored.acknowledged_by.contains("w1"));
        assert!(stored.viewed_by.contains("w1"));
    }

    #[tokio::test]
    async fn intervention_already_acknowledged_completes_first_try() {
        let mut h = harness(
            vec![ChatResponse::text(format!(
                "已收到干预通知。\n{}",
                long_completion()
            ))],
            false,
        );

        h.relay.broadcast_intervention(
            Intervention::new(InterventionKind::Inject, InterventionScope::Single, 8)
                .with_target("w1")
                .with_payload("information", serde_json::json!("补充信息")),
        );

        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);
        assert_eq!(state.iterations, 1);
    }

    #[tokio::test]
    async fn cancel_flag_ends_cancelled() {
        let mut h = harness(vec![ChatResponse::text("第一轮分析")], false);
        // Flag is sampled at the top of the iteration.
        h.controls.cancel();
        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Cancelled);
    }

    #[tokio::test]
    async fn pause_then_resume_completes() {
        let mut h = harness(vec![ChatResponse::text(long_completion())], false);
        h.controls.pause();
        let controls = h.controls.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            controls.resume();
        });

        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);

        let priority = drain(&mut h.priority_rx);
        assert!(priority
            .iter()
            .any(|e| matches!(e, WorkerEvent::Status { status: WorkerStatus::Paused, .. })));
    }

    #[tokio::test]
    async fn max_iterations_still_completes_with_last_text() {
        // No completion markers; four iterations of plain analysis.
        let mut h = harness(
            vec![
                ChatResponse::text("第一轮分析"),
                ChatResponse::text("第二轮分析"),
                ChatResponse::text("第三轮分析"),
                ChatResponse::text("第四轮分析"),
            ],
            false,
        );
        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);
        assert_eq!(state.iterations, 4);
        assert_eq!(state.final_result.as_deref(), Some("第四轮分析"));
    }

    #[tokio::test]
    async fn provider_error_fails_worker() {
        let h = harness(vec![], false);
        h.provider.push_error("upstream 500");
        let mut h = h;
        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Failed);
        assert!(state.error.unwrap().contains("upstream 500"));

        let priority = drain(&mut h.priority_rx);
        assert!(priority.iter().any(|e| matches!(e, WorkerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn force_injection_lands_in_log_before_llm_call() {
        let mut h = harness(
            vec![ChatResponse::text(long_completion())],
            false,
        );
        h.inject_tx.send("停止并总结".into()).unwrap();

        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.injected_info_count, 1);

        // The injected directive reached the provider inside the log.
        let requests = h.provider.requests.lock();
        let saw_injection = requests.iter().any(|req| {
            req.messages
                .iter()
                .any(|m| m.content.extract_all_text().contains("停止并总结"))
        });
        assert!(saw_injection);
    }

    #[tokio::test]
    async fn discovery_tag_posts_relay_message() {
        let mut h = harness(
            vec![
                ChatResponse::text(
                    "[关键发现]\n影片的长镜头占比远超同期作品，值得其他角色参考。\n\n继续分析。",
                ),
                ChatResponse::text(long_completion()),
            ],
            false,
        );
        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);
        assert_eq!(state.relay_messages_sent, 1);

        let history = h.relay.message_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, RelayKind::Discovery);
        assert_eq!(history[0].source_worker_id, "w1");
        assert_eq!(history[0].importance, 0.8);
        assert_eq!(history[0].metadata.get("iteration").unwrap(), 1);
    }

    #[tokio::test]
    async fn regular_relay_message_shapes_next_prompt() {
        let mut h = harness(
            vec![
                ChatResponse::text("第一轮分析"),
                ChatResponse::text(long_completion()),
            ],
            false,
        );
        h.relay.broadcast_message(
            RelayMessage::new(
                RelayKind::Question,
                "w2",
                "视觉设计师",
                vec!["w1".into()],
                "色彩口径如何统一？",
                0.6,
            ),
            None,
        );

        let state = h.worker.run(h.tx.clone()).await;
        assert_eq!(state.status, WorkerStatus::Completed);
        assert_eq!(state.relay_messages_received, 1);

        let requests = h.provider.requests.lock();
        let saw_question_prompt = requests.iter().any(|req| {
            req.messages
                .iter()
                .any(|m| m.content.extract_all_text().contains("[回复:"))
        });
        assert!(saw_question_prompt);
    }

    #[tokio::test]
    async fn web_search_script_runs_with_query_contract() {
        // A real script on disk receives the worker-built argv and its
        // stdout flows back as the tool result.
        let dir = tempfile::tempdir().unwrap();
        let scripts_dir = dir.path().join("web_search").join("scripts");
        std::fs::create_dir_all(&scripts_dir).unwrap();
        std::fs::write(
            scripts_dir.join("search.sh"),
            "echo \"{\\\"results\\\": [], \\\"argv\\\": \\\"$*\\\"}\"\n",
        )
        .unwrap();

        let registry = Arc::new(SkillRegistry::new());
        registry.register(SkillSpec {
            name: "web_search".into(),
            display_name: "网络搜索".into(),
            description: "在互联网上搜索信息".into(),
            parameters: serde_json::json!({"type": "object"}),
            script: Some("search.sh".into()),
        });
        let executor = Arc::new(ScriptRunner::new(registry.clone(), dir.path()));

        let mut search_role = role(false);
        search_role.assigned_skills = vec![SkillAssignment {
            skill_name: "web_search".into(),
            skill_display_name: "网络搜索".into(),
            reason: "信息检索".into(),
        }];
        let mut spec = WorkerSpec::new(search_role, "调研《电影X》的口碑");
        spec.id = "w1".into();

        let provider = Arc::new(MockProvider::new(vec![]));
        provider.push_tool_call(
            "c1",
            "web_search",
            serde_json::json!({"query": "电影X 长镜头", "max_results": 8}),
        );
        provider.push_text("");
        provider.push_text(long_completion());

        let (relay_events_tx, _relay_events_rx) = mpsc::unbounded_channel();
        let relay = Arc::new(RelayCoordinator::new("sess", relay_events_tx));
        let (_inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (_inject_tx, inject_rx) = mpsc::unbounded_channel();
        let worker = WorkerRuntime::new(
            spec,
            provider,
            registry,
            executor,
            relay,
            ControlFlags::new(),
            inbox_rx,
            inject_rx,
            String::new(),
        )
        .with_max_iterations(4);

        let (priority_tx, _priority_rx) = mpsc::unbounded_channel();
        let (normal_tx, mut normal_rx) = mpsc::unbounded_channel();
        let state = worker
            .run(WorkerTx {
                priority: priority_tx,
                normal: normal_tx,
            })
            .await;
        assert_eq!(state.status, WorkerStatus::Completed);

        let results: Vec<(bool, String)> = drain(&mut normal_rx)
            .into_iter()
            .filter_map(|e| match e {
                WorkerEvent::ToolCallResult {
                    success,
                    result_preview,
                    ..
                } => Some((success, result_preview)),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 1);
        let (success, preview) = &results[0];
        assert!(*success, "script call failed: {preview}");
        assert!(preview.contains("--query 电影X 长镜头"));
        assert!(preview.contains("--max-results 8"));
        assert!(preview.contains("--format json"));
    }

    #[test]
    fn script_args_for_web_search() {
        let args = build_script_args(
            "web_search",
            "电影X 长镜头",
            &serde_json::json!({"query": "电影X 长镜头", "max_results": 8, "type": "news"}),
        );
        assert_eq!(args[0], "--query");
        assert_eq!(args[1], "电影X 长镜头");
        assert!(args.contains(&"--max-results".to_string()));
        assert!(args.contains(&"8".to_string()));
        assert!(args.contains(&"--type".to_string()));
        let format_idx = args.iter().position(|a| a == "--format").unwrap();
        assert_eq!(args[format_idx + 1], "json");
    }

    #[test]
    fn script_args_generic_skill_uses_task() {
        let args = build_script_args("data_analysis", "统计镜头时长", &serde_json::json!({}));
        assert_eq!(args, vec!["--task", "统计镜头时长"]);
    }

    #[test]
    fn compact_tool_result_truncates_long_payloads() {
        let outcome = SkillOutcome::ok("x".repeat(5000), "done");
        let compact = compact_tool_result(&outcome);
        assert!(compact.len() < 2000);
        assert!(compact.contains("\"success\":true"));
    }

    #[test]
    fn extract_final_result_from_marker() {
        let text = "前置分析……\n[任务完成]\n最终结论如下。";
        assert_eq!(extract_final_result(text), "[任务完成]\n最终结论如下。");
        assert_eq!(extract_final_result("无标记结论"), "无标记结论");
    }
}
