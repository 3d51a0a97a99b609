//! Test support: scripted chat clients that replay canned responses.
//!
//! No network involved; used by this crate's integration tests and by the
//! flow crate's tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use mentis_core::message::{Message, ToolCall};
use mentis_core::provider::{ChatClient, ChatResponse, ToolChoice};
use mentis_core::Result;
use serde_json::Value;

/// A chat client that replays responses in order, then keeps repeating the
/// last one.
pub struct SequentialMockChat {
    responses: Mutex<VecDeque<ChatResponse>>,
    fallback: ChatResponse,
    ask_reply: String,
    tool_calls_served: AtomicUsize,
}

impl SequentialMockChat {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        let fallback = responses.last().cloned().unwrap_or_default();
        Self {
            responses: Mutex::new(responses.into()),
            fallback,
            ask_reply: "mock summary".into(),
            tool_calls_served: AtomicUsize::new(0),
        }
    }

    /// How many ask_tool requests this client has answered.
    pub fn tool_calls_served(&self) -> usize {
        self.tool_calls_served.load(Ordering::Relaxed)
    }

    /// A client that always answers with plain text.
    pub fn single_text(text: impl Into<String>) -> Self {
        Self::new(vec![text_response(text)])
    }

    /// First a thought with tool calls, then a plain-text answer.
    pub fn tool_then_answer(
        tool_calls: Vec<ToolCall>,
        thought: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self::new(vec![tool_response(thought, tool_calls), text_response(answer)])
    }

    /// Override the reply of plain `ask` calls.
    pub fn with_ask_reply(mut self, reply: impl Into<String>) -> Self {
        self.ask_reply = reply.into();
        self
    }
}

#[async_trait]
impl ChatClient for SequentialMockChat {
    async fn ask(&self, _: &[Message], _: &str, _: &str) -> Result<String> {
        Ok(self.ask_reply.clone())
    }

    async fn ask_tool(
        &self,
        _: &[Message],
        _: &str,
        _: &str,
        _: &[Value],
        _: ToolChoice,
    ) -> Result<ChatResponse> {
        self.tool_calls_served.fetch_add(1, Ordering::Relaxed);
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        Ok(responses.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// A plain-text assistant turn.
pub fn text_response(content: impl Into<String>) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls: Vec::new(),
    }
}

/// An assistant turn carrying tool calls.
pub fn tool_response(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls,
    }
}

/// Shorthand for a function tool call.
pub fn make_call(name: &str, arguments: Value) -> ToolCall {
    ToolCall::function(name, arguments)
}
