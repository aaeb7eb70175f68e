//! Deterministic scripted provider for tests.
//!
//! Each LLM call pops the next [`ChatResponse`] from the front of the
//! script queue. This lets tests specify exact response sequences —
//! including tool calls — without network access. `chat_stream` emits the
//! popped response's content as token chunks.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use sg_domain::error::{Error, Result};
use sg_domain::stream::{BoxStream, StreamEvent};
use sg_domain::tool::ToolCall;

pub struct MockProvider {
    scripts: Arc<Mutex<VecDeque<Result<ChatResponse>>>>,
    /// Every request seen by this provider, for test inspection.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
    /// Fallback reply once the script queue is exhausted.
    fallback: String,
}

impl MockProvider {
    pub fn new(scripts: Vec<ChatResponse>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().map(Ok).collect())),
            requests: Arc::new(Mutex::new(Vec::new())),
            fallback: "[no more scripts]".into(),
        }
    }

    /// Provider that always returns the same text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let mut p = Self::new(Vec::new());
        p.fallback = reply.into();
        p
    }

    /// Queue an error response (provider outage simulation).
    pub fn push_error(&self, message: impl Into<String>) {
        self.scripts.lock().push_back(Err(Error::Provider {
            provider: "mock".into(),
            message: message.into(),
        }));
    }

    /// Queue a plain text response.
    pub fn push_text(&self, reply: impl Into<String>) {
        self.scripts.lock().push_back(Ok(ChatResponse::text(reply)));
    }

    /// Queue a response that requests one tool call.
    pub fn push_tool_call(
        &self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) {
        self.scripts.lock().push_back(Ok(ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
                arguments,
            }],
            finish_reason: Some("tool_calls".into()),
        }));
    }

    fn pop(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req.clone());
        self.scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ChatResponse::text(self.fallback.clone())))
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.pop(req)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.pop(req)?;
        let stream = async_stream::stream! {
            // Chunk on char boundaries so CJK content streams like the
            // real thing.
            let chars: Vec<char> = resp.content.chars().collect();
            for chunk in chars.chunks(8) {
                yield Ok(StreamEvent::Token {
                    text: chunk.iter().collect(),
                });
            }
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}
