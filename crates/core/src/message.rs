//! Message and tool-call domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the agent appends messages to its memory, the LLM client serializes them
//! onto the wire, and tool results come back as tool-role messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::token;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image reference inside structured content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    /// Vision detail hint ("auto", "low", "high")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One typed part of structured message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }
}

/// Message content: either a plain string or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// Flatten content to plain text. Image parts are replaced with
    /// `[image1]`, `[image2]`, ... placeholders.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => {
                let mut out = String::new();
                let mut image_count = 0;
                for part in parts {
                    match part {
                        ContentPart::Text { text } => out.push_str(text),
                        ContentPart::ImageUrl { .. } => {
                            image_count += 1;
                            out.push_str(&format!("[image{image_count}]"));
                        }
                    }
                }
                out
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// True if any part is an image.
    pub fn has_images(&self) -> bool {
        matches!(self, MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })))
    }

    /// Interpret an untyped JSON value as message content. Values that are
    /// neither a string nor a well-formed parts array are flattened to text.
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value::<MessageContent>(value.clone()) {
            Ok(content) => content,
            Err(_) => MessageContent::Text(content_to_text(value)),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        MessageContent::Parts(parts)
    }
}

/// Flatten an arbitrary content JSON value to plain text, replacing image
/// parts with `[imageN]` placeholders. Mirrors [`MessageContent::as_text`]
/// for values that arrive untyped (tool outputs).
pub fn content_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let mut out = String::new();
            let mut image_count = 0;
            for item in items {
                match item.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(Value::as_str) {
                            out.push_str(text);
                        }
                    }
                    Some("image_url") => {
                        image_count += 1;
                        out.push_str(&format!("[image{image_count}]"));
                    }
                    _ => out.push_str(&item.to_string()),
                }
            }
            out
        }
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

/// The function payload of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// May arrive as a JSON string from the provider; parsed before dispatch.
    #[serde(default)]
    pub arguments: Value,
}

/// A structured request from the LLM to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    /// Create a function call with a fresh unique id.
    pub fn function(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            kind: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse a `tool_calls` array as returned by the chat endpoint.
    pub fn from_value_list(value: &Value) -> Vec<ToolCall> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A single message in a conversation.
///
/// `num_tokens` is computed once at construction from the content and tool
/// calls and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: MessageContent,

    /// Tool name, set on tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Which tool call this message responds to, set on tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Cached token estimate for this message.
    #[serde(skip)]
    pub num_tokens: usize,
}

impl Message {
    fn new(
        role: Role,
        content: MessageContent,
        name: Option<String>,
        tool_call_id: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let num_tokens = token::message_tokens(&content, &tool_calls);
        Self {
            role,
            content,
            name,
            tool_call_id,
            tool_calls,
            num_tokens,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content.into(), None, None, Vec::new())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content.into(), None, None, Vec::new())
    }

    /// Create a new assistant message without tool calls.
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content.into(), None, None, Vec::new())
    }

    /// Create a new assistant message carrying tool calls.
    pub fn assistant_with_tools(
        content: impl Into<MessageContent>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self::new(Role::Assistant, content.into(), None, None, tool_calls)
    }

    /// Create a tool result message.
    pub fn tool(
        content: impl Into<MessageContent>,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(
            Role::Tool,
            content.into(),
            Some(name.into()),
            Some(tool_call_id.into()),
            Vec::new(),
        )
    }

    /// Flattened text rendering of the content.
    pub fn text(&self) -> String {
        self.content.as_text()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.num_tokens > 0);
    }

    #[test]
    fn tool_message_carries_linkage() {
        let msg = Message::tool("result data", "call_1", "calculator");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("calculator"));
    }

    #[test]
    fn token_count_fixed_at_construction() {
        let a = Message::user("12345678");
        let b = Message::user("12345678");
        assert_eq!(a.num_tokens, b.num_tokens);
        // 8 chars → 2 tokens + 4 overhead
        assert_eq!(a.num_tokens, 6);
    }

    #[test]
    fn structured_content_flattens_with_image_placeholders() {
        let msg = Message::user(vec![
            ContentPart::text("look at "),
            ContentPart::image("data:image/png;base64,AAAA"),
            ContentPart::text(" please"),
        ]);
        assert_eq!(msg.text(), "look at [image1] please");
        assert!(msg.content.has_images());
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant_with_tools(
            "thinking",
            vec![ToolCall::function("search", json!({"q": "rust"}))],
        );
        let serialized = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed.role, Role::Assistant);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].function.name, "search");
    }

    #[test]
    fn content_serializes_untagged() {
        let plain = serde_json::to_value(&MessageContent::from("hi")).unwrap();
        assert_eq!(plain, json!("hi"));

        let parts =
            serde_json::to_value(&MessageContent::Parts(vec![ContentPart::text("hi")])).unwrap();
        assert_eq!(parts, json!([{"type": "text", "text": "hi"}]));
    }

    #[test]
    fn tool_call_list_parsing_skips_malformed_entries() {
        let value = json!([
            {"id": "call_1", "type": "function", "function": {"name": "a", "arguments": {}}},
            {"bogus": true},
        ]);
        let calls = ToolCall::from_value_list(&value);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "a");
    }

    #[test]
    fn content_to_text_handles_untyped_values() {
        assert_eq!(content_to_text(&json!("plain")), "plain");
        assert_eq!(content_to_text(&Value::Null), "");
        let mixed = json!([
            {"type": "text", "text": "a"},
            {"type": "image_url", "image_url": {"url": "data:x"}},
            {"type": "text", "text": "b"},
        ]);
        assert_eq!(content_to_text(&mixed), "a[image1]b");
    }
}
