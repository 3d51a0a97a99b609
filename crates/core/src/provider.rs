//! Provider traits: the seams between the runtime and its upstreams.
//!
//! The agent, memory, and flow only ever see `Arc<dyn ChatClient>` and
//! `Arc<dyn Embedder>`. Whether the concrete client speaks native
//! OpenAI-style tool calling or emulates it by parsing fenced blocks out of
//! plain content is hidden behind the single `ask_tool` contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::{Message, ToolCall};

/// Tool-choice strategy for a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model must not call tools.
    None,
    /// The model decides.
    Auto,
    /// The model must call at least one tool.
    Required,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::None => "none",
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
        }
    }
}

impl std::fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed assistant turn: free text plus zero or more tool calls.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Accumulated token usage of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A chat-completions endpoint the runtime can talk to.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Plain completion: returns the assistant content.
    async fn ask(
        &self,
        messages: &[Message],
        system_prompt: &str,
        next_step_prompt: &str,
    ) -> Result<String>;

    /// Tool-capable completion: returns content plus structured tool calls.
    async fn ask_tool(
        &self,
        messages: &[Message],
        system_prompt: &str,
        next_step_prompt: &str,
        tools: &[Value],
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse>;

    /// Whether this client can accept image content parts.
    fn enable_vision(&self) -> bool {
        false
    }

    /// Vision detail hint forwarded with image parts.
    fn vision_details(&self) -> &str {
        "auto"
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage::default()
    }

    fn reset_usage(&self) {}
}

/// What an embedding will be used for. Informational: the in-tree provider
/// ignores it, future providers may route to different models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Add,
    Search,
    Update,
}

/// A text-to-vector endpoint.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>>;

    /// Dimensionality of produced vectors.
    fn dims(&self) -> usize;
}
