//! Master orchestrator — drives one session end-to-end.
//!
//! Phases: planning (role emergence) → worker spawn → parallel execution
//! with a priority/normal channel merge → station close → integration.
//! Everything observable leaves through the session's event channel; the
//! session manager persists and fans out from there.
//!
//! One orchestrator instance per session. Followups dispose the instance
//! and build a fresh one around the retained session record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use sg_domain::error::{Error, Result};
use sg_domain::event::{StationParticipant, SwarmEvent};
use sg_domain::model::{
    truncate_chars, FollowupSnapshot, Intervention, InterventionKind, InterventionScope,
    PreviousRole, RelayKind, RelayMessage, TaskPlan, WorkerState, WorkerStatus,
};
use sg_domain::stream::StreamEvent;
use sg_domain::tool::Message;
use sg_providers::{ChatRequest, LlmProvider};
use sg_skills::{SkillExecutor, SkillRegistry};

use super::control::WorkerControls;
use super::planner::RolePlanner;
use super::prompts;
use super::relay::{RelayCoordinator, WorkerPorts};
use super::worker::{WorkerEvent, WorkerRuntime, WorkerSignal, WorkerTx};

/// How many normal-channel events are handled per merge round before the
/// priority channel is rechecked.
const NORMAL_BATCH: usize = 10;
/// Idle wait when both channels are empty but workers are still running.
const MERGE_WAIT: Duration = Duration::from_millis(100);
/// How many trailing regular relay messages the integration prompt sees.
const INTEGRATION_RELAY_TAIL: usize = 15;

struct WorkerHandle {
    name: String,
    inject_tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct MasterInner {
    task: String,
    plan: Option<TaskPlan>,
    worker_states: HashMap<String, WorkerState>,
    handles: HashMap<String, WorkerHandle>,
    final_report: String,
}

pub struct MasterOrchestrator {
    session_id: String,
    provider: Arc<dyn LlmProvider>,
    model: Option<String>,
    skills: Arc<SkillRegistry>,
    executor: Arc<dyn SkillExecutor>,
    relay: Arc<RelayCoordinator>,
    controls: Arc<WorkerControls>,
    events: mpsc::UnboundedSender<SwarmEvent>,
    worker_max_iterations: u32,
    inner: Mutex<MasterInner>,
}

impl MasterOrchestrator {
    pub fn new(
        session_id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        model: Option<String>,
        skills: Arc<SkillRegistry>,
        executor: Arc<dyn SkillExecutor>,
        events: mpsc::UnboundedSender<SwarmEvent>,
        worker_max_iterations: u32,
    ) -> Self {
        let session_id = session_id.into();
        tracing::info!(session_id = %session_id, "master orchestrator created");
        Self {
            relay: Arc::new(RelayCoordinator::new(session_id.clone(), events.clone())),
            session_id,
            provider,
            model,
            skills,
            executor,
            controls: Arc::new(WorkerControls::new()),
            events,
            worker_max_iterations,
            inner: Mutex::new(MasterInner::default()),
        }
    }

    pub fn relay(&self) -> Arc<RelayCoordinator> {
        self.relay.clone()
    }

    fn emit(&self, event: SwarmEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(session_id = %self.session_id, "event channel closed");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Task execution
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run a task to completion. Events stream out through the session
    /// channel; a top-level failure ends the stream with RUN_ERROR.
    pub async fn execute_task(
        self: Arc<Self>,
        task: String,
        context: Option<String>,
        previous_roles: Vec<PreviousRole>,
    ) {
        let run_id = Uuid::new_v4().to_string();
        self.inner.lock().task = task.clone();

        self.emit(SwarmEvent::RunStarted {
            thread_id: self.session_id.clone(),
            run_id: run_id.clone(),
        });

        match self
            .clone()
            .run_inner(&run_id, &task, context, previous_roles)
            .await
        {
            Ok(()) => {
                self.emit(SwarmEvent::RunFinished {
                    thread_id: self.session_id.clone(),
                    run_id,
                });
            }
            Err(e) => {
                let (message, code) = match &e {
                    Error::Planning(msg) => {
                        (format!("PLANNING_FAILED: {msg}"), Some("PLANNING_FAILED"))
                    }
                    other => (other.to_string(), None),
                };
                tracing::warn!(session_id = %self.session_id, error = %message, "run failed");
                self.emit(SwarmEvent::RunError {
                    message,
                    code: code.map(String::from),
                });
            }
        }
    }

    async fn run_inner(
        self: Arc<Self>,
        run_id: &str,
        task: &str,
        context: Option<String>,
        previous_roles: Vec<PreviousRole>,
    ) -> Result<()> {
        // ── Phase 1: planning ─────────────────────────────────────
        let planning_id = format!("planning-{run_id}");
        self.emit(SwarmEvent::TextMessageStart {
            message_id: planning_id.clone(),
            role: "assistant".into(),
        });
        self.emit(SwarmEvent::TextMessageContent {
            message_id: planning_id.clone(),
            delta: if context.is_some() {
                "🔄 基于上一轮结果继续分析，规划角色涌现...\n\n".into()
            } else {
                "🔍 正在分析任务，规划角色涌现...\n\n".into()
            },
        });

        let planner = RolePlanner::new(self.provider.clone(), self.model.clone());
        let plan_result = planner
            .emerge(task, context.as_deref(), &previous_roles, |delta| {
                self.emit(SwarmEvent::TextMessageContent {
                    message_id: planning_id.clone(),
                    delta: delta.to_string(),
                });
            })
            .await;

        let plan = match plan_result {
            Ok(plan) => plan,
            Err(e) => {
                self.emit(SwarmEvent::TextMessageContent {
                    message_id: planning_id.clone(),
                    delta: "\n\n❌ 角色涌现失败\n".into(),
                });
                self.emit(SwarmEvent::TextMessageEnd {
                    message_id: planning_id,
                });
                return Err(e);
            }
        };

        self.emit(SwarmEvent::TextMessageContent {
            message_id: planning_id.clone(),
            delta: format!("\n\n✅ 成功涌现 {} 个角色\n", plan.workers.len()),
        });
        self.emit(SwarmEvent::TextMessageEnd {
            message_id: planning_id,
        });

        self.emit(SwarmEvent::PlanGenerated {
            plan_id: plan.id.clone(),
            original_task: plan.original_task.clone(),
            analysis: plan.analysis.clone(),
            phases: plan.phases.clone(),
            estimated_duration_seconds: plan.estimated_duration_seconds,
            total_agents: plan.workers.len() as u32,
        });
        for spec in &plan.workers {
            self.emit(SwarmEvent::RoleEmerged {
                role_id: spec.role.id.clone(),
                role_name: spec.role.name.clone(),
                description: spec.role.description.clone(),
                capabilities: spec.role.capabilities.clone(),
                focus_areas: spec.role.focus_areas.clone(),
                reasoning: "基于任务分析自动涌现".into(),
            });
        }
        self.inner.lock().plan = Some(plan.clone());

        // ── Phase 2: spawn workers ────────────────────────────────
        let spawning_id = format!("spawning-{run_id}");
        self.emit(SwarmEvent::TextMessageStart {
            message_id: spawning_id.clone(),
            role: "assistant".into(),
        });
        self.emit(SwarmEvent::TextMessageContent {
            message_id: spawning_id.clone(),
            delta: format!("\n🤖 正在生成 {} 个 Subagent...\n\n", plan.workers.len()),
        });

        let workers = self.spawn_workers(&plan, context.as_deref().unwrap_or(""));

        for spec in &plan.workers {
            self.emit(SwarmEvent::AgentSpawned {
                agent_id: spec.id.clone(),
                agent_name: spec.role.name.clone(),
                role: spec.role.clone(),
                task_segment: spec.task_segment.clone(),
            });
            self.emit(SwarmEvent::TextMessageContent {
                message_id: spawning_id.clone(),
                delta: format!(
                    "  ✅ {} - {}\n",
                    spec.role.name,
                    truncate_chars(&spec.role.description, 50)
                ),
            });
        }
        self.emit(SwarmEvent::TextMessageEnd {
            message_id: spawning_id,
        });

        // ── Phase 3: open station, run workers in parallel ────────
        if let Some(plan_station) = plan.stations.first() {
            let participants: Vec<String> = plan.workers.iter().map(|w| w.id.clone()).collect();
            let station =
                self.relay
                    .create_station(&plan_station.name, plan_station.phase, participants);
            self.relay.open_station(&station.id);
            self.emit(SwarmEvent::RelayStationOpened {
                station_id: station.id.clone(),
                station_name: station.name.clone(),
                phase: station.phase,
                participating_agents: plan
                    .workers
                    .iter()
                    .map(|w| StationParticipant {
                        id: w.id.clone(),
                        name: w.role.name.clone(),
                    })
                    .collect(),
            });
        }

        self.run_workers_parallel(workers).await;

        // ── Phase 4: close station ────────────────────────────────
        if let Some(active_id) = self.relay.active_station_id() {
            if let Some(summary) = self.relay.close_station(&active_id) {
                let station = self.relay.station(&active_id);
                self.emit(SwarmEvent::RelayStationClosed {
                    station_id: active_id,
                    station_name: station.map(|s| s.name).unwrap_or_default(),
                    summary,
                });
            }
        }

        // ── Phase 5: integration ──────────────────────────────────
        let integrating_id = format!("integrating-{run_id}");
        self.emit(SwarmEvent::TextMessageStart {
            message_id: integrating_id.clone(),
            role: "assistant".into(),
        });
        self.emit(SwarmEvent::TextMessageContent {
            message_id: integrating_id.clone(),
            delta: "\n\n📝 所有 Subagent 完成工作，正在整合结果...\n\n".into(),
        });

        self.integrate_results(&integrating_id).await?;

        self.emit(SwarmEvent::TextMessageEnd {
            message_id: integrating_id,
        });
        Ok(())
    }

    // ── Worker spawning ───────────────────────────────────────────

    fn spawn_workers(&self, plan: &TaskPlan, user_memory: &str) -> Vec<WorkerRuntime> {
        // Clean up registrations left over from a prior run on this
        // session.
        let new_ids: Vec<&str> = plan.workers.iter().map(|w| w.id.as_str()).collect();
        for stale in self.relay.registered_ids() {
            if !new_ids.contains(&stale.as_str()) {
                tracing::debug!(worker_id = %stale, "unregistering stale worker");
                self.relay.unregister_worker(&stale);
                self.controls.remove(&stale);
            }
        }

        let mut runtimes = Vec::new();
        let mut inner = self.inner.lock();
        inner.worker_states.clear();
        inner.handles.clear();

        for spec in &plan.workers {
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            let (inject_tx, inject_rx) = mpsc::unbounded_channel();

            // The worker classifies interventions itself while draining,
            // so the intervention port is the same inbox channel — its
            // presence keeps the preferential dispatch path exercised.
            self.relay.register_worker(
                &spec.id,
                WorkerPorts {
                    inbox: inbox_tx.clone(),
                    intervention: Some(inbox_tx),
                    inject: Some(inject_tx.clone()),
                },
            );
            let controls = self.controls.register(&spec.id);

            inner
                .worker_states
                .insert(spec.id.clone(), WorkerState::new(&spec.id, &spec.role.name));
            inner.handles.insert(
                spec.id.clone(),
                WorkerHandle {
                    name: spec.role.name.clone(),
                    inject_tx,
                },
            );

            runtimes.push(
                WorkerRuntime::new(
                    spec.clone(),
                    self.provider.clone(),
                    self.skills.clone(),
                    self.executor.clone(),
                    self.relay.clone(),
                    controls,
                    inbox_rx,
                    inject_rx,
                    user_memory.to_string(),
                )
                .with_max_iterations(self.worker_max_iterations),
            );
        }

        runtimes
    }

    // ── Parallel execution and event merge ────────────────────────

    /// Run all workers concurrently, merging their event streams.
    ///
    /// Two channels: status/error/result signals arrive on the priority
    /// channel and are always drained first; thinking/progress/tool
    /// signals are drained in bounded batches so a chatty worker cannot
    /// starve a sibling's completion.
    async fn run_workers_parallel(&self, workers: Vec<WorkerRuntime>) {
        let (priority_tx, mut priority_rx) = mpsc::unbounded_channel::<WorkerSignal>();
        let (normal_tx, mut normal_rx) = mpsc::unbounded_channel::<WorkerSignal>();
        let tx = WorkerTx {
            priority: priority_tx,
            normal: normal_tx,
        };

        let mut join_handles = Vec::new();
        let total = workers.len();
        for worker in workers {
            let worker_tx = tx.clone();
            join_handles.push(tokio::spawn(worker.run(worker_tx)));
        }
        // Drop the master's copy so the channels close when workers end.
        drop(tx);

        let mut terminal = 0usize;
        while terminal < total {
            // Stage 1: drain every pending priority signal.
            while let Ok(signal) = priority_rx.try_recv() {
                terminal += self.handle_signal(signal);
            }

            // Stage 2: a bounded batch of normal signals.
            let mut batch = 0;
            while batch < NORMAL_BATCH {
                match normal_rx.try_recv() {
                    Ok(signal) => {
                        self.handle_signal(signal);
                        batch += 1;
                    }
                    Err(_) => break,
                }
            }

            // Stage 3: both empty — wait briefly for either, or detect
            // that all worker tasks are done and drain the remainder.
            if batch == 0 {
                if join_handles.iter().all(|h| h.is_finished()) {
                    while let Ok(signal) = priority_rx.try_recv() {
                        terminal += self.handle_signal(signal);
                    }
                    while let Ok(signal) = normal_rx.try_recv() {
                        self.handle_signal(signal);
                    }
                    break;
                }
                tokio::select! {
                    signal = priority_rx.recv() => {
                        if let Some(signal) = signal {
                            terminal += self.handle_signal(signal);
                        }
                    }
                    signal = normal_rx.recv() => {
                        if let Some(signal) = signal {
                            self.handle_signal(signal);
                        }
                    }
                    _ = tokio::time::sleep(MERGE_WAIT) => {}
                }
            }
        }

        // Authoritative final states.
        for handle in join_handles {
            match handle.await {
                Ok(state) => {
                    self.inner.lock().worker_states.insert(state.id.clone(), state);
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "worker task panicked");
                }
            }
        }
    }

    /// Update the state mirror and forward the signal as a wire event.
    /// Returns 1 when the signal is a terminal status transition.
    fn handle_signal(&self, signal: WorkerSignal) -> usize {
        let WorkerSignal {
            worker_id,
            worker_name,
            event,
        } = signal;

        let mut terminal = 0;
        {
            let mut inner = self.inner.lock();
            let state = inner
                .worker_states
                .entry(worker_id.clone())
                .or_insert_with(|| WorkerState::new(&worker_id, &worker_name));
            match &event {
                WorkerEvent::Status { status, .. } => {
                    state.set_status(*status);
                    if status.is_terminal() {
                        terminal = 1;
                    }
                }
                WorkerEvent::Progress {
                    progress,
                    step,
                    iterations,
                } => {
                    state.set_progress(*progress, step.clone());
                    state.iterations = *iterations;
                }
                WorkerEvent::Thinking { delta } => {
                    state.thinking.push_str(delta);
                }
                WorkerEvent::Result { final_result } => {
                    state.final_result = Some(final_result.clone());
                }
                WorkerEvent::Error { message } => {
                    state.error = Some(message.clone());
                }
                _ => {}
            }
        }

        if let Some(event) = convert_signal(&worker_id, &worker_name, event) {
            self.emit(event);
        }
        terminal
    }

    // ── Integration ───────────────────────────────────────────────

    async fn integrate_results(&self, message_id: &str) -> Result<()> {
        let prompt = self.build_integration_prompt();
        let messages = vec![
            Message::system(prompts::INTEGRATION_SYSTEM_PROMPT),
            Message::user(prompt),
        ];
        let req = ChatRequest::new(messages).with_model(self.model.clone());

        let mut stream = self.provider.chat_stream(&req).await?;
        let mut report = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    report.push_str(&text);
                    self.emit(SwarmEvent::TextMessageContent {
                        message_id: message_id.to_string(),
                        delta: text,
                    });
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: self.provider.provider_id().into(),
                        message,
                    });
                }
                StreamEvent::Done { .. } => break,
                _ => {}
            }
        }

        self.inner.lock().final_report = report;
        Ok(())
    }

    fn build_integration_prompt(&self) -> String {
        let inner = self.inner.lock();
        let mut parts = vec![
            format!("## 原始任务\n{}\n", inner.task),
            format!(
                "## 任务分析\n{}\n",
                inner
                    .plan
                    .as_ref()
                    .map(|p| p.analysis.as_str())
                    .unwrap_or_default()
            ),
        ];

        let interventions = self.relay.intervention_history();
        let intervention_block = prompts::format_intervention_history(&interventions);
        if !intervention_block.is_empty() {
            parts.push(intervention_block);
        }

        parts.push("\n## 各角色分析结果\n".into());
        for state in inner.worker_states.values() {
            if let Some(result) = &state.final_result {
                parts.push(format!("### {}\n{}\n\n", state.name, result));
            }
        }

        let regular: Vec<RelayMessage> = self
            .relay
            .message_history()
            .into_iter()
            .filter(|m| m.kind != RelayKind::HumanIntervention)
            .collect();
        if !regular.is_empty() {
            parts.push("\n## Agent间中继信息交换\n".into());
            let start = regular.len().saturating_sub(INTEGRATION_RELAY_TAIL);
            for msg in &regular[start..] {
                let kind = serde_json::to_value(msg.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                parts.push(format!(
                    "- [{kind}] {}: {}\n",
                    msg.source_worker_name, msg.content
                ));
            }
        }

        parts.push(
            "\n## 整合要求\n\
             请基于以上所有信息，整合生成一份完整、专业、深入的分析报告。\n\
             **特别注意**：\n\
             1. 如果有人工干预记录，必须在报告中明确体现对干预指令的响应\n\
             2. 整合各角色的分析结果，消除矛盾，突出共识\n\
             3. 形成有价值的综合洞察和建议\n"
                .into(),
        );

        parts.join("\n")
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Intervention API
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn has_worker(&self, worker_id: &str) -> bool {
        self.inner.lock().handles.contains_key(worker_id)
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.inner.lock().handles.keys().cloned().collect()
    }

    pub fn pause_worker(
        &self,
        worker_id: &str,
        reason: &str,
        broadcast: bool,
    ) -> Option<RelayMessage> {
        let flags = self.controls.get(worker_id)?;
        flags.pause();
        self.dispatch(
            Intervention::new(InterventionKind::Pause, InterventionScope::Single, 7)
                .with_target(worker_id)
                .with_reason(if reason.is_empty() {
                    "用户暂停了该 Agent"
                } else {
                    reason
                }),
            broadcast,
        )
    }

    pub fn resume_worker(
        &self,
        worker_id: &str,
        reason: &str,
        broadcast: bool,
    ) -> Option<RelayMessage> {
        let flags = self.controls.get(worker_id)?;
        flags.resume();
        self.dispatch(
            Intervention::new(InterventionKind::Resume, InterventionScope::Single, 6)
                .with_target(worker_id)
                .with_reason(if reason.is_empty() {
                    "用户恢复了该 Agent"
                } else {
                    reason
                }),
            broadcast,
        )
    }

    pub fn cancel_worker(
        &self,
        worker_id: &str,
        reason: &str,
        broadcast: bool,
    ) -> Option<RelayMessage> {
        let flags = self.controls.get(worker_id)?;
        flags.cancel();
        self.dispatch(
            Intervention::new(InterventionKind::Cancel, InterventionScope::Single, 8)
                .with_target(worker_id)
                .with_reason(if reason.is_empty() {
                    "用户取消了该 Agent 的任务"
                } else {
                    reason
                }),
            broadcast,
        )
    }

    /// Feed information straight into a worker's log and (optionally)
    /// notify the rest of the swarm.
    pub fn inject_to_worker(
        &self,
        worker_id: &str,
        information: &str,
        broadcast: bool,
        priority: u8,
    ) -> Option<RelayMessage> {
        let name = {
            let inner = self.inner.lock();
            let handle = inner.handles.get(worker_id)?;
            if handle.inject_tx.send(information.to_string()).is_err() {
                tracing::warn!(worker_id, "inject channel closed");
            }
            handle.name.clone()
        };
        self.dispatch(
            Intervention::new(InterventionKind::Inject, InterventionScope::Broadcast, priority)
                .with_target(worker_id)
                .with_payload("information", serde_json::json!(information))
                .with_reason(format!("用户向 {name} 注入了信息")),
            broadcast,
        )
    }

    /// Broadcast to every worker. `force_action` applies the information
    /// to each worker's log (scope `all`); otherwise it is notify-only.
    pub fn broadcast_all(
        &self,
        message: &str,
        reason: &str,
        priority: u8,
        force_action: bool,
    ) -> Option<RelayMessage> {
        let targets = self.worker_ids();
        if targets.is_empty() {
            return None;
        }
        let scope = if force_action {
            InterventionScope::All
        } else {
            InterventionScope::Broadcast
        };
        self.dispatch(
            Intervention::new(InterventionKind::Inject, scope, priority)
                .with_targets(targets)
                .with_payload("information", serde_json::json!(message))
                .with_reason(if reason.is_empty() {
                    "用户广播了一条消息"
                } else {
                    reason
                }),
            true,
        )
    }

    /// Package adjustment directives as an injection plus an adjust
    /// broadcast.
    pub fn adjust_worker(
        &self,
        worker_id: &str,
        adjustments: &serde_json::Map<String, serde_json::Value>,
        reason: &str,
        broadcast: bool,
    ) -> Option<RelayMessage> {
        let name = {
            let inner = self.inner.lock();
            let handle = inner.handles.get(worker_id)?;
            let mut directive = String::from("请根据以下指示调整你的工作方向：\n");
            for (key, value) in adjustments {
                directive.push_str(&format!("- {key}: {value}\n"));
            }
            if handle.inject_tx.send(directive).is_err() {
                tracing::warn!(worker_id, "inject channel closed");
            }
            handle.name.clone()
        };
        self.dispatch(
            Intervention::new(InterventionKind::Adjust, InterventionScope::Broadcast, 6)
                .with_target(worker_id)
                .with_payload(
                    "adjustments",
                    serde_json::Value::Object(adjustments.clone()),
                )
                .with_reason(if reason.is_empty() {
                    format!("用户调整了 {name} 的工作方向")
                } else {
                    reason.to_string()
                }),
            broadcast,
        )
    }

    /// Generic entry used by the HTTP surface: apply the control action
    /// per kind and scope, then broadcast per `broadcast_to_relay`.
    pub fn apply_intervention(&self, intervention: Intervention) -> Option<RelayMessage> {
        let targets: Vec<String> = match intervention.scope {
            InterventionScope::Single => intervention
                .target_worker_id
                .clone()
                .into_iter()
                .collect(),
            InterventionScope::Selected => intervention.target_worker_ids.clone(),
            InterventionScope::All | InterventionScope::Broadcast => self.worker_ids(),
        };

        for target in &targets {
            match intervention.kind {
                InterventionKind::Pause => {
                    if let Some(flags) = self.controls.get(target) {
                        flags.pause();
                    }
                }
                InterventionKind::Resume => {
                    if let Some(flags) = self.controls.get(target) {
                        flags.resume();
                    }
                }
                InterventionKind::Cancel => {
                    if let Some(flags) = self.controls.get(target) {
                        flags.cancel();
                    }
                }
                InterventionKind::Inject | InterventionKind::Restart => {
                    // Scope `all` force-ingest is handled by the relay
                    // coordinator; a single/selected inject feeds the
                    // target directly here.
                    if intervention.scope != InterventionScope::All {
                        if let Some(info) = intervention.information() {
                            let inner = self.inner.lock();
                            if let Some(handle) = inner.handles.get(target) {
                                let _ = handle.inject_tx.send(info.to_string());
                            }
                        }
                    }
                }
                InterventionKind::Adjust => {
                    if let Some(adjustments) = intervention.adjustments() {
                        let mut directive = String::from("请根据以下指示调整你的工作方向：\n");
                        for (key, value) in adjustments {
                            directive.push_str(&format!("- {key}: {value}\n"));
                        }
                        let inner = self.inner.lock();
                        if let Some(handle) = inner.handles.get(target) {
                            let _ = handle.inject_tx.send(directive);
                        }
                    }
                }
            }
        }

        let broadcast = intervention.broadcast_to_relay;
        self.emit(SwarmEvent::InterventionApplied {
            intervention_id: intervention.id.clone(),
            kind: intervention.kind,
            target_ids: targets,
        });
        self.dispatch(intervention, broadcast)
    }

    /// Record the intervention and, when requested, broadcast it through
    /// the relay. History is appended either way.
    fn dispatch(&self, intervention: Intervention, broadcast: bool) -> Option<RelayMessage> {
        if broadcast {
            Some(self.relay.broadcast_intervention(intervention))
        } else {
            self.relay.record_intervention(intervention);
            None
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // State, summary, cleanup
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.inner.lock().worker_states.values().cloned().collect()
    }

    pub fn final_report(&self) -> String {
        self.inner.lock().final_report.clone()
    }

    /// Live-state snapshot for subscribers and the state endpoints.
    pub fn live_state(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        let workers: HashMap<&String, &WorkerState> = inner.worker_states.iter().collect();
        serde_json::json!({
            "session_id": self.session_id,
            "task": inner.task,
            "plan": inner.plan,
            "workers": workers,
            "final_report": inner.final_report,
            "intervention_count": self.relay.intervention_history().len(),
        })
    }

    /// Extract what the next round on this session needs: report, recent
    /// interventions, the cast.
    pub fn extract_summary(&self) -> FollowupSnapshot {
        let inner = self.inner.lock();

        let previous_roles = inner
            .plan
            .as_ref()
            .map(|plan| {
                plan.workers
                    .iter()
                    .map(|w| PreviousRole {
                        name: w.role.name.clone(),
                        description: w.role.description.clone(),
                        capabilities: w.role.capabilities.clone(),
                        focus_areas: w.role.focus_areas.clone(),
                        task_segment: w.task_segment.clone(),
                        expertise_level: w.role.expertise_level.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let interventions = self.relay.intervention_history();
        let intervention_summary = if interventions.is_empty() {
            None
        } else {
            let tail = interventions.iter().rev().take(5).collect::<Vec<_>>();
            let lines: Vec<String> = tail
                .into_iter()
                .rev()
                .map(|i| {
                    let info = match i.kind {
                        InterventionKind::Inject => {
                            truncate_chars(i.information().unwrap_or_default(), 200)
                        }
                        InterventionKind::Adjust => truncate_chars(
                            &i.adjustments()
                                .map(|a| serde_json::Value::Object(a.clone()).to_string())
                                .unwrap_or_default(),
                            200,
                        ),
                        _ => {
                            if i.reason.is_empty() {
                                i.kind.as_str().to_string()
                            } else {
                                i.reason.clone()
                            }
                        }
                    };
                    format!("- [{}] {}", i.kind.as_str(), info)
                })
                .collect();
            Some(lines.join("\n"))
        };

        FollowupSnapshot {
            final_report: inner.final_report.clone(),
            intervention_summary,
            previous_roles,
            task_history: Vec::new(),
        }
    }

    /// Tear down: cancel workers, drop registrations, clear relay state.
    /// Persisted records survive; the in-memory session does not.
    pub fn cleanup(&self) {
        tracing::info!(session_id = %self.session_id, "cleaning up orchestrator");
        self.controls.cancel_all();
        for worker_id in self.relay.registered_ids() {
            self.relay.unregister_worker(&worker_id);
        }
        self.controls.clear();
        self.relay.clear();
        let mut inner = self.inner.lock();
        inner.handles.clear();
        inner.worker_states.clear();
    }
}

/// Worker signal → wire event. Results and completion blocks stay
/// internal; everything else maps onto the event model.
fn convert_signal(worker_id: &str, worker_name: &str, event: WorkerEvent) -> Option<SwarmEvent> {
    match event {
        WorkerEvent::Status { previous, status } => Some(SwarmEvent::AgentStatusChanged {
            agent_id: worker_id.into(),
            agent_name: worker_name.into(),
            previous_status: previous,
            new_status: status,
        }),
        WorkerEvent::Progress {
            progress,
            step,
            iterations,
        } => Some(SwarmEvent::AgentProgress {
            agent_id: worker_id.into(),
            agent_name: worker_name.into(),
            progress,
            current_step: step,
            iterations,
        }),
        WorkerEvent::Thinking { delta } => Some(SwarmEvent::AgentThinking {
            agent_id: worker_id.into(),
            agent_name: worker_name.into(),
            thinking: delta,
        }),
        WorkerEvent::ToolCallStart { call_id, tool_name } => Some(SwarmEvent::ToolCallStart {
            tool_call_id: call_id,
            tool_call_name: tool_name,
            parent_message_id: Some(worker_id.into()),
        }),
        WorkerEvent::ToolCallResult {
            call_id,
            tool_name,
            success,
            summary,
            result_preview,
        } => Some(SwarmEvent::ToolCallResult {
            tool_call_id: call_id,
            result: serde_json::json!({
                "agent_id": worker_id,
                "agent_name": worker_name,
                "skill_name": tool_name,
                "success": success,
                "summary": summary,
                "result_preview": result_preview,
            })
            .to_string(),
        }),
        WorkerEvent::Result { .. }
        | WorkerEvent::CompletionBlocked { .. }
        | WorkerEvent::Error { .. } => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use sg_domain::error::Result as DomainResult;
    use sg_domain::stream::BoxStream;
    use sg_providers::{ChatRequest, ChatResponse, MockProvider};
    use sg_skills::PromptModeExecutor;

    fn plan_json(role_count: usize) -> String {
        let roles: Vec<String> = (0..role_count)
            .map(|i| {
                format!(
                    r#"{{
                        "name": "角色{i}",
                        "description": "维度{i}专家",
                        "system_prompt": "你是角色{i}。",
                        "task_segment": "处理维度{i}",
                        "assigned_skills": []
                    }}"#
                )
            })
            .collect();
        format!(
            r#"{{"analysis": "需要协作", "roles": [{}], "phases": [{{"phase_number": 1, "name": "执行"}}], "estimated_duration_seconds": 120}}"#,
            roles.join(",")
        )
    }

    fn completion_text() -> String {
        format!("[任务完成]\n{}", "维度结论。".repeat(40))
    }

    /// Empty registry: parsed roles keep their (empty) skill lists so the
    /// tool subloop is skipped and script consumption stays deterministic.
    fn master(
        provider: Arc<dyn LlmProvider>,
    ) -> (Arc<MasterOrchestrator>, mpsc::UnboundedReceiver<SwarmEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let skills = Arc::new(SkillRegistry::new());
        let executor = Arc::new(PromptModeExecutor::new(skills.clone()));
        let master = Arc::new(MasterOrchestrator::new(
            "sess-1", provider, None, skills, executor, events_tx, 3,
        ));
        (master, events_rx)
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<SwarmEvent>) -> Vec<SwarmEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[SwarmEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    #[tokio::test]
    async fn happy_path_event_order() {
        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse::text(format!("规划中…\n```json\n{}\n```", plan_json(2))),
            ChatResponse::text(completion_text()),
            ChatResponse::text(completion_text()),
            ChatResponse::text("# 综合报告\n两个维度的结论一致。"),
        ]));
        let (master, mut rx) = master(provider);

        master
            .clone()
            .execute_task("分析电影X的镜头语言".into(), None, vec![])
            .await;

        let events = collect(&mut rx);
        let kinds = names(&events);

        assert_eq!(kinds.first(), Some(&"RUN_STARTED"));
        assert_eq!(kinds.last(), Some(&"RUN_FINISHED"));

        let idx = |name: &str| kinds.iter().position(|k| *k == name).unwrap();
        assert!(idx("PLAN_GENERATED") < idx("ROLE_EMERGED"));
        assert!(idx("ROLE_EMERGED") < idx("AGENT_SPAWNED"));
        assert!(idx("AGENT_SPAWNED") < idx("RELAY_STATION_OPENED"));
        assert!(idx("RELAY_STATION_OPENED") < idx("RELAY_STATION_CLOSED"));

        assert_eq!(kinds.iter().filter(|k| **k == "ROLE_EMERGED").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "AGENT_SPAWNED").count(), 2);

        // Both workers report a completed transition before the station
        // closes.
        let completed: Vec<usize> = events
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e {
                SwarmEvent::AgentStatusChanged {
                    new_status: WorkerStatus::Completed,
                    ..
                } => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|i| *i < idx("RELAY_STATION_CLOSED")));

        // PLAN_GENERATED carries the cast size.
        match &events[idx("PLAN_GENERATED")] {
            SwarmEvent::PlanGenerated { total_agents, .. } => assert_eq!(*total_agents, 2),
            _ => unreachable!(),
        }

        assert!(master.final_report().contains("综合报告"));
    }

    #[tokio::test]
    async fn intra_worker_ordering_preserved() {
        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse::text(format!("```json\n{}\n```", plan_json(2))),
            ChatResponse::text(completion_text()),
            ChatResponse::text(completion_text()),
            ChatResponse::text("整合完成。"),
        ]));
        let (master, mut rx) = master(provider);
        master
            .clone()
            .execute_task("任务".into(), None, vec![])
            .await;
        let events = collect(&mut rx);

        // For every worker: spawned → running → … → completed, in order.
        let mut spawned: HashMap<String, usize> = HashMap::new();
        let mut running: HashMap<String, usize> = HashMap::new();
        let mut completed: HashMap<String, usize> = HashMap::new();
        for (i, event) in events.iter().enumerate() {
            match event {
                SwarmEvent::AgentSpawned { agent_id, .. } => {
                    spawned.entry(agent_id.clone()).or_insert(i);
                }
                SwarmEvent::AgentStatusChanged {
                    agent_id,
                    new_status,
                    ..
                } => match new_status {
                    WorkerStatus::Running => {
                        running.entry(agent_id.clone()).or_insert(i);
                    }
                    WorkerStatus::Completed => {
                        completed.entry(agent_id.clone()).or_insert(i);
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        assert_eq!(spawned.len(), 2);
        for (agent_id, spawn_idx) in &spawned {
            assert!(spawn_idx < running.get(agent_id).unwrap());
            assert!(running.get(agent_id).unwrap() < completed.get(agent_id).unwrap());
        }
    }

    #[tokio::test]
    async fn planning_failure_emits_run_error() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::text(
            "Sorry, I cannot...",
        )]));
        let (master, mut rx) = master(provider);
        master
            .clone()
            .execute_task("任务".into(), None, vec![])
            .await;

        let events = collect(&mut rx);
        let kinds = names(&events);
        assert_eq!(kinds.first(), Some(&"RUN_STARTED"));
        assert_eq!(kinds.last(), Some(&"RUN_ERROR"));
        assert!(!kinds.contains(&"AGENT_SPAWNED"));

        match events.last().unwrap() {
            SwarmEvent::RunError { message, code } => {
                assert!(message.starts_with("PLANNING_FAILED"));
                assert_eq!(code.as_deref(), Some("PLANNING_FAILED"));
            }
            _ => unreachable!(),
        }
    }

    /// Provider that delays every call so a test can intervene mid-run.
    struct SlowProvider {
        inner: MockProvider,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl LlmProvider for SlowProvider {
        async fn chat(&self, req: &ChatRequest) -> DomainResult<ChatResponse> {
            tokio::time::sleep(self.delay).await;
            self.inner.chat(req).await
        }
        async fn chat_stream(
            &self,
            req: &ChatRequest,
        ) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.chat_stream(req).await
        }
        fn provider_id(&self) -> &str {
            "slow-mock"
        }
    }

    #[tokio::test]
    async fn forced_broadcast_reaches_worker_logs_mid_run() {
        let inner = MockProvider::new(vec![
            ChatResponse::text(format!("```json\n{}\n```", plan_json(1))),
            ChatResponse::text("第一轮分析，尚未完成。".to_string()),
            ChatResponse::text(format!("已收到干预通知。\n{}", completion_text())),
            ChatResponse::text("整合完成。".to_string()),
        ]);
        let requests = inner.requests.clone();
        let provider = Arc::new(SlowProvider {
            inner,
            delay: Duration::from_millis(80),
        });
        let (master, mut rx) = master(provider);

        let run = tokio::spawn(master.clone().execute_task("任务".into(), None, vec![]));

        // Wait until the worker exists, then force-broadcast.
        let mut spawned = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !master.worker_ids().is_empty() {
                spawned = true;
                break;
            }
        }
        assert!(spawned, "worker never spawned");
        let message = master
            .broadcast_all("停止发散，聚焦在镜头语言上", "用户纠偏", 8, true)
            .unwrap();
        assert_eq!(message.kind, RelayKind::HumanIntervention);

        run.await.unwrap();

        let events = collect(&mut rx);
        let kinds = names(&events);
        assert!(kinds.contains(&"RELAY_MESSAGE_SENT"));
        assert!(kinds.contains(&"INTERVENTION_BROADCAST"));
        assert_eq!(kinds.last(), Some(&"RUN_FINISHED"));

        // The force-ingested directive reached the worker's log.
        let saw_injection = requests.lock().iter().any(|req| {
            req.messages
                .iter()
                .any(|m| m.content.extract_all_text().contains("人工注入信息"))
        });
        assert!(saw_injection);

        // And the intervention history feeds the integration prompt.
        assert_eq!(master.relay.intervention_history().len(), 1);
    }

    #[tokio::test]
    async fn intervention_on_unknown_worker_is_none() {
        let provider = Arc::new(MockProvider::always_text("ok"));
        let (master, _rx) = master(provider);
        assert!(master.pause_worker("ghost", "", true).is_none());
        assert!(master.inject_to_worker("ghost", "info", true, 5).is_none());
        assert!(master
            .adjust_worker("ghost", &serde_json::Map::new(), "", true)
            .is_none());
    }

    #[tokio::test]
    async fn summary_and_live_state_after_run() {
        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse::text(format!("```json\n{}\n```", plan_json(2))),
            ChatResponse::text(completion_text()),
            ChatResponse::text(completion_text()),
            ChatResponse::text("# 报告正文".to_string()),
        ]));
        let (master, _rx) = master(provider);
        master
            .clone()
            .execute_task("分析电影X".into(), None, vec![])
            .await;

        let snapshot = master.extract_summary();
        assert!(snapshot.final_report.contains("报告正文"));
        assert_eq!(snapshot.previous_roles.len(), 2);

        let state = master.live_state();
        assert_eq!(state["session_id"], "sess-1");
        assert_eq!(state["workers"].as_object().unwrap().len(), 2);

        master.cleanup();
        assert!(master.worker_ids().is_empty());
        assert!(master.relay.message_history().is_empty());
    }
}
