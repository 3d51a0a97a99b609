//! Emulated tool calling for providers without native support.
//!
//! When `enable_tool` is off, the tool catalog is injected into the prompt
//! via a hint template and the reply content is scanned for fenced JSON
//! blocks of the form `<tool_call>{"name": ..., "arguments": ...}</tool_call>`
//! (delimiters configurable). Parsed calls get fresh ids; the fences are cut
//! out of the surfaced content.

use mentis_core::message::{FunctionCall, ToolCall};
use mentis_core::provider::ChatResponse;
use mentis_core::{Error, Result};
use uuid::Uuid;

const DEFAULT_HINT_TEMPLATE: &str = "Available tools:\n{tool_list}\n\nFor each tool call, \
return a json object with tool name and arguments within {tool_start}{tool_end} XML tags:\n\
{tool_start}\n{\"name\": <tool-name>, \"arguments\": <args-json-object>}\n{tool_end}";

/// Parses and renders fenced tool calls.
#[derive(Debug, Clone)]
pub struct ToolParser {
    tool_start: String,
    tool_end: String,
    hint_template: String,
}

impl Default for ToolParser {
    fn default() -> Self {
        Self {
            tool_start: "<tool_call>".into(),
            tool_end: "</tool_call>".into(),
            hint_template: DEFAULT_HINT_TEMPLATE.into(),
        }
    }
}

impl ToolParser {
    pub fn new(
        tool_start: impl Into<String>,
        tool_end: impl Into<String>,
        hint_template: Option<String>,
    ) -> Self {
        Self {
            tool_start: tool_start.into(),
            tool_end: tool_end.into(),
            hint_template: hint_template.unwrap_or_else(|| DEFAULT_HINT_TEMPLATE.into()),
        }
    }

    /// Render the prompt hint advertising the tool catalog.
    pub fn hint(&self, tool_list: &str) -> String {
        self.hint_template
            .replace("{tool_start}", &self.tool_start)
            .replace("{tool_end}", &self.tool_end)
            .replace("{tool_list}", tool_list)
    }

    /// Extract fenced tool calls from reply content. The fences are removed
    /// from the returned content; a missing closing fence consumes the rest
    /// of the text.
    pub fn parse(&self, content: &str) -> Result<ChatResponse> {
        let mut remaining = content.to_string();
        let mut tool_calls = Vec::new();

        while let Some(start) = remaining.find(&self.tool_start) {
            let body_start = start + self.tool_start.len();
            let (body_end, cut_end) = match remaining[body_start..].find(&self.tool_end) {
                Some(offset) => (
                    body_start + offset,
                    body_start + offset + self.tool_end.len(),
                ),
                None => (remaining.len(), remaining.len()),
            };

            let body = remaining[body_start..body_end].trim();
            if !body.is_empty() {
                let function: FunctionCall = serde_json::from_str(body)
                    .map_err(|_| Error::Invalid(format!("Invalid tool call: {body}")))?;
                tool_calls.push(ToolCall {
                    id: format!("call_{}", Uuid::new_v4().simple()),
                    kind: "function".into(),
                    function,
                });
            }

            let lhs = remaining[..start].trim();
            let rhs = remaining[cut_end..].trim();
            remaining = format!("{lhs}{rhs}");
        }

        Ok(ChatResponse {
            content: remaining,
            tool_calls,
        })
    }

    /// Render tool calls back into fenced text (used when replaying an
    /// assistant message to a provider without native tool calling).
    pub fn dump(&self, tool_calls: &[ToolCall]) -> String {
        let mut out = String::new();
        for call in tool_calls {
            let function = serde_json::json!({
                "name": call.function.name,
                "arguments": call.function.arguments,
            });
            out.push_str(&self.tool_start);
            out.push_str(
                &serde_json::to_string_pretty(&function).unwrap_or_else(|_| function.to_string()),
            );
            out.push_str(&self.tool_end);
        }
        out
    }
}
