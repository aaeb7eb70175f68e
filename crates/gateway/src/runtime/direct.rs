//! Direct mode — a single-agent, multi-turn variant.
//!
//! No planner, no relay coordinator: one assistant with every skill
//! assigned, the same tool-call subloop as a swarm worker, and a rolling
//! conversation history trimmed by round count and character budget after
//! each turn.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use sg_domain::error::{Error, Result};
use sg_domain::event::SwarmEvent;
use sg_domain::model::{truncate_chars, FollowupSnapshot};
use sg_domain::stream::StreamEvent;
use sg_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use sg_providers::{ChatRequest, LlmProvider};
use sg_skills::{SkillExecutor, SkillOutcome, SkillRegistry};

use super::worker::build_invocation;

const MAX_TOOL_ROUNDS: usize = 5;
/// Rounds kept after each turn; one round = a user message through the
/// next user message.
const MAX_HISTORY_ROUNDS: usize = 6;
/// Character budget for the retained history.
const MAX_HISTORY_CHARS: usize = 24_000;
/// Tool results longer than this are truncated on retention.
const TOOL_RESULT_RETAIN_CHARS: usize = 1500;

const DIRECT_SYSTEM_PROMPT: &str = "你是一个专业、可靠的智能助手。\n\
    请直接、完整地回答用户的任务。需要外部信息或计算时，调用可用的工具；\n\
    回答使用清晰的 Markdown 结构，引用来源时在结尾列出链接。";

pub struct DirectAgent {
    session_id: String,
    agent_id: String,
    provider: Arc<dyn LlmProvider>,
    model: Option<String>,
    skills: Arc<SkillRegistry>,
    executor: Arc<dyn SkillExecutor>,
    events: mpsc::UnboundedSender<SwarmEvent>,
    history: Mutex<Vec<Message>>,
    final_report: Mutex<String>,
    tool_timeout: Duration,
    detect_timeout: Duration,
}

impl DirectAgent {
    pub fn new(
        session_id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        model: Option<String>,
        skills: Arc<SkillRegistry>,
        executor: Arc<dyn SkillExecutor>,
        events: mpsc::UnboundedSender<SwarmEvent>,
    ) -> Self {
        let session_id = session_id.into();
        let agent_id = format!("direct-{}", truncate_chars(&session_id, 8));
        tracing::info!(session_id = %session_id, "direct agent created");
        Self {
            session_id,
            agent_id,
            provider,
            model,
            skills,
            executor,
            events,
            history: Mutex::new(Vec::new()),
            final_report: Mutex::new(String::new()),
            tool_timeout: Duration::from_secs(45),
            detect_timeout: Duration::from_secs(60),
        }
    }

    fn emit(&self, event: SwarmEvent) {
        let _ = self.events.send(event);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Turn execution
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn execute_task(self: Arc<Self>, task: String) {
        let run_id = Uuid::new_v4().to_string();
        self.emit(SwarmEvent::RunStarted {
            thread_id: self.session_id.clone(),
            run_id: run_id.clone(),
        });

        match self.clone().run_turn(&run_id, &task).await {
            Ok(()) => self.emit(SwarmEvent::RunFinished {
                thread_id: self.session_id.clone(),
                run_id,
            }),
            Err(e) => {
                let message_id = format!("direct-{run_id}");
                self.emit(SwarmEvent::TextMessageContent {
                    message_id: message_id.clone(),
                    delta: format!("\n\n❌ 错误: {e}"),
                });
                self.emit(SwarmEvent::TextMessageEnd { message_id });
                self.emit(SwarmEvent::RunError {
                    message: e.to_string(),
                    code: None,
                });
            }
        }
    }

    async fn run_turn(self: Arc<Self>, run_id: &str, task: &str) -> Result<()> {
        let message_id = format!("direct-{run_id}");
        let tool_defs = self.skills.tool_definitions(&self.skills.list_names());

        let mut messages = vec![Message::system(DIRECT_SYSTEM_PROMPT)];
        let history_len = {
            let history = self.history.lock();
            messages.extend(history.iter().cloned());
            history.len()
        };
        messages.push(Message::user(task));

        // ── Tool rounds: detect, execute, feed back, repeat ───────
        if !tool_defs.is_empty() {
            for round in 0..MAX_TOOL_ROUNDS {
                let req = ChatRequest::new(messages.clone())
                    .with_tools(tool_defs.clone())
                    .with_model(self.model.clone());
                let detected = match tokio::time::timeout(
                    self.detect_timeout,
                    self.provider.detect_tool_calls(&req),
                )
                .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        tracing::warn!(round, "direct tool detection timed out");
                        self.emit(SwarmEvent::AgentThinking {
                            agent_id: self.agent_id.clone(),
                            agent_name: "Assistant".into(),
                            thinking: "工具检索达到时限，先基于已有信息继续生成完整结论。".into(),
                        });
                        break;
                    }
                };

                if detected.tool_calls.is_empty() {
                    break;
                }

                if !detected.content.is_empty() {
                    self.emit(SwarmEvent::AgentThinking {
                        agent_id: self.agent_id.clone(),
                        agent_name: "Assistant".into(),
                        thinking: detected.content.clone(),
                    });
                }

                messages.push(Message::assistant_with_tool_calls(
                    &detected.content,
                    &detected.tool_calls,
                ));

                for call in &detected.tool_calls {
                    let result_message = self.execute_tool_call(call, &message_id).await;
                    messages.push(result_message);
                }
            }
        }

        // ── Final streamed answer ─────────────────────────────────
        self.emit(SwarmEvent::TextMessageStart {
            message_id: message_id.clone(),
            role: "assistant".into(),
        });

        let req = ChatRequest::new(messages.clone()).with_model(self.model.clone());
        let mut stream = self.provider.chat_stream(&req).await?;
        let mut full = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    full.push_str(&text);
                    self.emit(SwarmEvent::TextMessageContent {
                        message_id: message_id.clone(),
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
        self.emit(SwarmEvent::TextMessageEnd {
            message_id: message_id.clone(),
        });

        // ── Retain this turn in the rolling history ───────────────
        {
            let mut history = self.history.lock();
            // Everything after the system prompt and prior history is new.
            for message in messages.into_iter().skip(1 + history_len) {
                history.push(retain_message(message));
            }
            if !full.trim().is_empty() {
                history.push(Message::assistant(&full));
            }
            trim_history(&mut history);
        }

        *self.final_report.lock() = full;
        Ok(())
    }

    async fn execute_tool_call(&self, call: &ToolCall, message_id: &str) -> Message {
        self.emit(SwarmEvent::ToolCallStart {
            tool_call_id: call.call_id.clone(),
            tool_call_name: call.tool_name.clone(),
            parent_message_id: Some(message_id.to_string()),
        });
        self.emit(SwarmEvent::ToolCallArgs {
            tool_call_id: call.call_id.clone(),
            delta: call.arguments.to_string(),
        });

        let invocation = build_invocation(call);

        let outcome = match tokio::time::timeout(
            self.tool_timeout,
            self.executor.execute(&invocation),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => SkillOutcome::failure(e.to_string()),
            Err(_) => SkillOutcome::failure(format!(
                "skill '{}' timed out after {}s",
                call.tool_name,
                self.tool_timeout.as_secs()
            )),
        };

        self.emit(SwarmEvent::ToolCallEnd {
            tool_call_id: call.call_id.clone(),
        });
        self.emit(SwarmEvent::ToolCallResult {
            tool_call_id: call.call_id.clone(),
            result: serde_json::json!({
                "agent_id": self.agent_id,
                "agent_name": "Assistant",
                "skill_name": call.tool_name,
                "success": outcome.success,
                "summary": outcome.summary,
                "result_preview": truncate_chars(&outcome.result, 500),
            })
            .to_string(),
        });

        let compact = serde_json::json!({
            "success": outcome.success,
            "summary": outcome.summary,
            "result_preview": truncate_chars(&outcome.result, 1200),
            "error": outcome.error,
        });
        Message::tool_result(&call.call_id, compact.to_string())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // State and cleanup
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn history_snapshot(&self) -> Vec<Message> {
        self.history.lock().clone()
    }

    pub fn final_report(&self) -> String {
        self.final_report.lock().clone()
    }

    pub fn live_state(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id,
            "mode": "direct",
            "history_messages": self.history.lock().len(),
            "final_report": self.final_report.lock().clone(),
        })
    }

    pub fn extract_summary(&self) -> FollowupSnapshot {
        FollowupSnapshot {
            final_report: self.final_report.lock().clone(),
            ..Default::default()
        }
    }

    pub fn cleanup(&self) {
        tracing::info!(session_id = %self.session_id, "cleaning up direct agent");
        self.history.lock().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History trimming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool results are truncated on retention so a burst of long tool output
/// cannot dominate later turns.
fn retain_message(message: Message) -> Message {
    if message.role != Role::Tool {
        return message;
    }
    let MessageContent::Parts(parts) = &message.content else {
        return message;
    };
    let truncated: Vec<ContentPart> = parts
        .iter()
        .map(|part| match part {
            ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } if content.chars().count() > TOOL_RESULT_RETAIN_CHARS => ContentPart::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: format!(
                    "{}\n...(结果已截取前{TOOL_RESULT_RETAIN_CHARS}字符)",
                    truncate_chars(content, TOOL_RESULT_RETAIN_CHARS)
                ),
                is_error: *is_error,
            },
            other => other.clone(),
        })
        .collect();
    Message {
        role: message.role,
        content: MessageContent::Parts(truncated),
    }
}

/// Two-stage trim: keep the most recent [`MAX_HISTORY_ROUNDS`] rounds,
/// then drop the oldest round while the character total exceeds the
/// budget and more than two rounds remain.
fn trim_history(history: &mut Vec<Message>) {
    if history.is_empty() {
        return;
    }

    let round_starts = |history: &[Message]| -> Vec<usize> {
        history
            .iter()
            .enumerate()
            .filter_map(|(i, m)| (m.role == Role::User).then_some(i))
            .collect()
    };

    let mut starts = round_starts(history);
    if starts.len() > MAX_HISTORY_ROUNDS {
        let trim_from = starts[starts.len() - MAX_HISTORY_ROUNDS];
        let old_len = history.len();
        history.drain(..trim_from);
        tracing::debug!(
            from = old_len,
            to = history.len(),
            "trimmed direct history by rounds"
        );
        starts = round_starts(history);
    }

    let mut total_chars: usize = history.iter().map(|m| m.content.char_count()).sum();
    while total_chars > MAX_HISTORY_CHARS && starts.len() > 2 {
        let next_round_start = starts[1];
        let removed: usize = history[..next_round_start]
            .iter()
            .map(|m| m.content.char_count())
            .sum();
        history.drain(..next_round_start);
        total_chars -= removed;
        starts = round_starts(history);
        tracing::debug!(remaining_chars = total_chars, "trimmed direct history by budget");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use sg_providers::{ChatResponse, MockProvider};
    use sg_skills::PromptModeExecutor;

    fn agent(
        provider: Arc<MockProvider>,
        skills: Arc<SkillRegistry>,
    ) -> (Arc<DirectAgent>, mpsc::UnboundedReceiver<SwarmEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let executor = Arc::new(PromptModeExecutor::new(skills.clone()));
        let agent = Arc::new(DirectAgent::new(
            "sess-direct",
            provider,
            None,
            skills,
            executor,
            events_tx,
        ));
        (agent, events_rx)
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<SwarmEvent>) -> Vec<SwarmEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn plain_turn_streams_and_finishes() {
        // Empty registry: no tool rounds, one streaming call.
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::text("直接回答。")]));
        let (agent, mut rx) = agent(provider, Arc::new(SkillRegistry::new()));

        agent.clone().execute_task("什么是长镜头？".into()).await;

        let events = collect(&mut rx);
        let kinds: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(kinds.first(), Some(&"RUN_STARTED"));
        assert_eq!(kinds.last(), Some(&"RUN_FINISHED"));
        assert!(kinds.contains(&"TEXT_MESSAGE_START"));
        assert!(kinds.contains(&"TEXT_MESSAGE_CONTENT"));
        assert!(kinds.contains(&"TEXT_MESSAGE_END"));

        assert_eq!(agent.final_report(), "直接回答。");
        // History: user + assistant.
        let history = agent.history_snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_round_then_final_answer() {
        let provider = Arc::new(MockProvider::new(vec![]));
        provider.push_tool_call("c1", "reasoning", serde_json::json!({"task": "计算镜头占比"}));
        provider.push_text(""); // second detection round: no tools
        provider.push_text("最终答案：62%。");
        let (agent, mut rx) = agent(provider, Arc::new(SkillRegistry::builtin()));

        agent.clone().execute_task("镜头占比是多少？".into()).await;

        let events = collect(&mut rx);
        let kinds: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert!(kinds.contains(&"TOOL_CALL_START"));
        assert!(kinds.contains(&"TOOL_CALL_ARGS"));
        assert!(kinds.contains(&"TOOL_CALL_END"));
        assert!(kinds.contains(&"TOOL_CALL_RESULT"));
        assert_eq!(kinds.last(), Some(&"RUN_FINISHED"));
        assert_eq!(agent.final_report(), "最终答案：62%。");

        // The tool exchange is part of the retained history.
        let history = agent.history_snapshot();
        assert!(history.iter().any(|m| m.role == Role::Tool));
    }

    #[tokio::test]
    async fn provider_error_ends_with_run_error() {
        let provider = Arc::new(MockProvider::new(vec![]));
        provider.push_error("upstream 500");
        let (agent, mut rx) = agent(provider, Arc::new(SkillRegistry::new()));

        agent.clone().execute_task("任务".into()).await;

        let events = collect(&mut rx);
        assert_eq!(events.last().map(|e| e.event_name()), Some("RUN_ERROR"));
    }

    #[tokio::test]
    async fn multi_turn_history_keeps_six_rounds() {
        let provider = Arc::new(MockProvider::always_text("回答"));
        let (agent, _rx) = agent(provider, Arc::new(SkillRegistry::new()));

        for i in 0..9 {
            agent.clone().execute_task(format!("问题 {i}")).await;
        }

        let history = agent.history_snapshot();
        let user_count = history.iter().filter(|m| m.role == Role::User).count();
        assert!(user_count <= MAX_HISTORY_ROUNDS);
        // Oldest rounds gone, newest retained.
        let texts: Vec<String> = history
            .iter()
            .map(|m| m.content.extract_all_text())
            .collect();
        assert!(!texts.iter().any(|t| t.contains("问题 0")));
        assert!(texts.iter().any(|t| t.contains("问题 8")));
    }

    #[test]
    fn trim_by_char_budget_keeps_at_least_two_rounds() {
        let mut history = Vec::new();
        for i in 0..4 {
            history.push(Message::user(format!("问题 {i}")));
            history.push(Message::assistant("答".repeat(9000)));
        }
        trim_history(&mut history);

        let user_count = history.iter().filter(|m| m.role == Role::User).count();
        assert!(user_count >= 2);
        let total: usize = history.iter().map(|m| m.content.char_count()).sum();
        // Budget respected once more than two rounds existed.
        assert!(total <= 2 * 9010 + 20);
    }

    #[test]
    fn trim_never_drops_below_two_rounds_even_over_budget() {
        let mut history = vec![
            Message::user("q1"),
            Message::assistant("答".repeat(20000)),
            Message::user("q2"),
            Message::assistant("答".repeat(20000)),
        ];
        trim_history(&mut history);
        let user_count = history.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(user_count, 2);
    }

    #[test]
    fn retain_truncates_long_tool_results() {
        let message = Message::tool_result("c1", "x".repeat(4000));
        let retained = retain_message(message);
        match &retained.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { content, .. } => {
                    assert!(content.chars().count() < 1600);
                    assert!(content.contains("结果已截取"));
                }
                _ => panic!("expected ToolResult"),
            },
            _ => panic!("expected Parts"),
        }
    }
}
