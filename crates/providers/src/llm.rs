//! OpenAI-compatible chat client.
//!
//! Works with any provider exposing a `/v1/chat/completions` endpoint.
//! Native tool calling sends `tools` + `tool_choice`; when the configured
//! model cannot call tools, the catalog is injected as a prompt hint and the
//! reply content is parsed for fenced calls. Both paths surface through the
//! single [`ChatClient::ask_tool`] contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mentis_config::LlmConfig;
use mentis_core::message::{content_to_text, Message, Role, ToolCall};
use mentis_core::provider::{ChatClient, ChatResponse, TokenUsage, ToolChoice};
use mentis_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::tool_parser::ToolParser;

const MAX_RETRIES: usize = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// A chat-completions client bound to one named LLM configuration.
pub struct LlmClient {
    name: String,
    config: LlmConfig,
    client: reqwest::Client,
    parser: ToolParser,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl LlmClient {
    pub fn new(name: impl Into<String>, config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| Error::Fatal(format!("Failed to create HTTP client: {e}")))?;
        let parser = ToolParser::new(
            config.tool_start.clone(),
            config.tool_end.clone(),
            config.tool_hint_template.clone(),
        );
        Ok(Self {
            name: name.into(),
            config,
            client,
            parser,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Concatenate two content values. Two strings join with a newline;
    /// anything else promotes to a parts array.
    fn concat_content(lhs: Value, rhs: Value) -> Value {
        fn push_parts(parts: &mut Vec<Value>, value: Value) {
            match value {
                Value::Null => {}
                Value::String(text) => parts.push(json!({"type": "text", "text": text})),
                Value::Array(items) => parts.extend(items),
                other => parts.push(other),
            }
        }

        match (lhs, rhs) {
            (Value::Null, rhs) => rhs,
            (lhs, Value::Null) => lhs,
            (Value::String(a), Value::String(b)) => Value::String(format!("{a}\n{b}")),
            (lhs, rhs) => {
                let mut parts = Vec::new();
                push_parts(&mut parts, lhs);
                push_parts(&mut parts, rhs);
                Value::Array(parts)
            }
        }
    }

    /// Format the message list into the wire shape the endpoint accepts:
    /// skip empty messages, rewrite tool traffic for non-tool-calling
    /// models, merge consecutive same-role messages, and strip image parts
    /// when vision is disabled.
    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        let mut formatted: Vec<Value> = Vec::new();

        for message in messages {
            if message.is_empty() {
                continue;
            }

            let mut wire = json!({ "role": message.role.as_str() });
            if !message.content.is_empty() {
                wire["content"] = message.content.to_value();
            }
            if !message.tool_calls.is_empty() {
                wire["tool_calls"] =
                    Value::Array(message.tool_calls.iter().map(|c| c.to_value()).collect());
            }
            if let Some(name) = &message.name {
                wire["name"] = json!(name);
            }
            if let Some(id) = &message.tool_call_id {
                wire["tool_call_id"] = json!(id);
            }

            if !self.config.enable_tool {
                if wire.get("content").is_none() {
                    wire["content"] = json!("");
                }
                if message.role == Role::Tool {
                    let tool_name = message.name.clone().unwrap_or_default();
                    let prefix = json!(format!("Tool result for `{tool_name}`:\n"));
                    let content = wire["content"].take();
                    wire["role"] = json!("user");
                    wire["content"] = Self::concat_content(prefix, content);
                    if let Some(obj) = wire.as_object_mut() {
                        obj.remove("tool_call_id");
                        obj.remove("name");
                    }
                } else if !message.tool_calls.is_empty() {
                    let calls_text = self.parser.dump(&message.tool_calls);
                    if let Some(obj) = wire.as_object_mut() {
                        obj.remove("tool_calls");
                    }
                    let content = wire["content"].take();
                    wire["content"] = Self::concat_content(content, json!(calls_text));
                }
            }

            formatted.push(wire);
        }

        // Merge runs of same-role messages into one.
        let mut merged: Vec<Value> = Vec::new();
        for mut wire in formatted {
            match merged.last_mut() {
                Some(prev) if prev["role"] == wire["role"] => {
                    let content = Self::concat_content(prev["content"].take(), wire["content"].take());
                    prev["content"] = content;
                    if wire.get("tool_calls").is_some() {
                        let mut calls: Vec<Value> = prev["tool_calls"]
                            .as_array()
                            .cloned()
                            .unwrap_or_default();
                        if let Some(more) = wire["tool_calls"].as_array() {
                            calls.extend(more.clone());
                        }
                        prev["tool_calls"] = Value::Array(calls);
                    }
                }
                _ => merged.push(wire),
            }
        }

        if !self.config.enable_vision {
            for wire in &mut merged {
                if wire.get("content").is_some() {
                    let text = content_to_text(&wire["content"]);
                    wire["content"] = json!(text);
                }
            }
        }

        merged
    }

    /// Append text to the trailing user message, creating one if needed.
    fn append_to_last_user(messages: &mut Vec<Value>, text: &str) {
        let needs_new = messages
            .last()
            .map(|m| m["role"] != json!("user"))
            .unwrap_or(true);
        if needs_new {
            messages.push(json!({"role": "user", "content": text}));
            return;
        }
        let Some(last) = messages.last_mut() else {
            return;
        };
        match &mut last["content"] {
            Value::String(content) => {
                content.push_str("\n\n");
                content.push_str(text);
            }
            Value::Array(parts) => {
                parts.push(json!({"type": "text", "text": text}));
            }
            other => *other = json!(text),
        }
    }

    fn build_messages(
        &self,
        messages: &[Message],
        system_prompt: &str,
        next_step_prompt: &str,
    ) -> Vec<Value> {
        let mut wire = Vec::new();
        if !system_prompt.is_empty() {
            wire.push(json!({"role": "system", "content": system_prompt}));
        }
        wire.extend(self.format_messages(messages));
        if !next_step_prompt.is_empty() {
            Self::append_to_last_user(&mut wire, next_step_prompt);
        }
        wire
    }

    fn base_body(&self, messages: Vec<Value>) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// One request attempt. Non-200 statuses and unparseable bodies map to
    /// `Upstream`.
    async fn post(&self, body: &Value) -> Result<Value> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.endpoint
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to send request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "Request failed: status={status}, body={body_text}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse response: {e}")))
    }

    fn accumulate_usage(&self, response: &Value) {
        let usage = &response["usage"];
        self.prompt_tokens.fetch_add(
            usage["prompt_tokens"].as_u64().unwrap_or(0),
            Ordering::Relaxed,
        );
        self.completion_tokens.fetch_add(
            usage["completion_tokens"].as_u64().unwrap_or(0),
            Ordering::Relaxed,
        );
    }
}

#[async_trait]
impl ChatClient for LlmClient {
    async fn ask(
        &self,
        messages: &[Message],
        system_prompt: &str,
        next_step_prompt: &str,
    ) -> Result<String> {
        let wire = self.build_messages(messages, system_prompt, next_step_prompt);
        let body = self.base_body(wire);

        for attempt in 0..=MAX_RETRIES {
            match self.post(&body).await {
                Ok(response) => {
                    if let Some(content) = response["choices"][0]["message"]["content"].as_str() {
                        self.accumulate_usage(&response);
                        return Ok(content.to_string());
                    }
                    warn!(model = %self.config.model, "Malformed completion response");
                }
                Err(e) => warn!(model = %self.config.model, error = %e, "Completion request failed"),
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(RETRY_PAUSE).await;
                debug!("Retrying {}/{}", attempt + 1, MAX_RETRIES);
            }
        }

        Err(Error::Upstream("Failed to get response from LLM".into()))
    }

    async fn ask_tool(
        &self,
        messages: &[Message],
        system_prompt: &str,
        next_step_prompt: &str,
        tools: &[Value],
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse> {
        for tool in tools {
            if tool.get("type").is_none() {
                return Err(Error::Invalid(format!(
                    "Tool must contain a `type` field but got: {tool}"
                )));
            }
        }
        if tool_choice == ToolChoice::Required && tools.is_empty() {
            return Err(Error::Invalid(
                "No tool available for required tool choice".into(),
            ));
        }

        let mut wire = self.build_messages(messages, system_prompt, next_step_prompt);
        let mut body;
        if self.config.enable_tool {
            body = self.base_body(wire);
            body["tools"] = Value::Array(tools.to_vec());
            body["tool_choice"] = json!(tool_choice.as_str());
        } else {
            let catalog = serde_json::to_string_pretty(&tools).unwrap_or_default();
            Self::append_to_last_user(&mut wire, &self.parser.hint(&catalog));
            body = self.base_body(wire);
        }

        for attempt in 0..=MAX_RETRIES {
            match self.post(&body).await {
                Ok(response) => {
                    let message = &response["choices"][0]["message"];
                    let parsed = if !self.config.enable_tool {
                        match message["content"].as_str() {
                            Some(content) => self.parser.parse(content),
                            None => Err(Error::Upstream("Missing content in response".into())),
                        }
                    } else {
                        Ok(ChatResponse {
                            content: message["content"].as_str().unwrap_or_default().to_string(),
                            tool_calls: ToolCall::from_value_list(&message["tool_calls"]),
                        })
                    };
                    match parsed {
                        Ok(parsed) => {
                            self.accumulate_usage(&response);
                            return Ok(parsed);
                        }
                        Err(e) => {
                            warn!(model = %self.config.model, error = %e, "Failed to parse tool response")
                        }
                    }
                }
                Err(e) => warn!(model = %self.config.model, error = %e, "Tool request failed"),
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(RETRY_PAUSE).await;
                debug!("Retrying {}/{}", attempt + 1, MAX_RETRIES);
            }
        }

        Err(Error::Upstream("Failed to get response from LLM".into()))
    }

    fn enable_vision(&self) -> bool {
        self.config.enable_vision
    }

    fn vision_details(&self) -> &str {
        &self.config.vision_details
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }

    fn reset_usage(&self) {
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentis_core::message::ContentPart;
    use serde_json::json;

    fn client_with(config: LlmConfig) -> LlmClient {
        LlmClient::new("test", config).unwrap()
    }

    fn native_client() -> LlmClient {
        client_with(LlmConfig::default())
    }

    fn emulated_client() -> LlmClient {
        client_with(LlmConfig {
            enable_tool: false,
            ..LlmConfig::default()
        })
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let client = native_client();
        let wire = client.format_messages(&[
            Message::user("first"),
            Message::user("second"),
            Message::assistant("reply"),
        ]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["content"], json!("first\nsecond"));
        assert_eq!(wire[1]["role"], json!("assistant"));
    }

    #[test]
    fn empty_messages_are_skipped() {
        let client = native_client();
        let wire = client.format_messages(&[Message::user(""), Message::user("real")]);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["content"], json!("real"));
    }

    #[test]
    fn vision_disabled_flattens_image_parts() {
        let client = native_client();
        let wire = client.format_messages(&[Message::user(vec![
            ContentPart::text("see "),
            ContentPart::image("data:image/png;base64,AA"),
        ])]);
        assert_eq!(wire[0]["content"], json!("see [image1]"));
    }

    #[test]
    fn emulated_mode_rewrites_tool_traffic() {
        let client = emulated_client();
        let calls = vec![ToolCall::function("search", json!({"q": "x"}))];
        let wire = client.format_messages(&[
            Message::assistant_with_tools("thinking", calls),
            Message::tool("found it", "call_1", "search"),
        ]);

        // Assistant message: tool_calls folded into fenced content.
        assert!(wire[0].get("tool_calls").is_none());
        let assistant_content = wire[0]["content"].as_str().unwrap();
        assert!(assistant_content.contains("<tool_call>"));
        assert!(assistant_content.contains("search"));

        // Tool message: surfaced as user content.
        assert_eq!(wire[1]["role"], json!("user"));
        let tool_content = wire[1]["content"].as_str().unwrap();
        assert!(tool_content.contains("Tool result for `search`"));
        assert!(tool_content.contains("found it"));
        assert!(wire[1].get("tool_call_id").is_none());
    }

    #[test]
    fn next_step_prompt_appends_to_trailing_user() {
        let client = native_client();
        let wire = client.build_messages(&[Message::user("task")], "sys", "what next?");
        assert_eq!(wire[0]["role"], json!("system"));
        assert_eq!(wire[1]["content"], json!("task\n\nwhat next?"));
    }

    #[test]
    fn next_step_prompt_creates_user_when_needed() {
        let client = native_client();
        let wire = client.build_messages(&[Message::assistant("done")], "", "continue");
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[1]["role"], json!("user"));
        assert_eq!(wire[1]["content"], json!("continue"));
    }

    #[tokio::test]
    async fn ask_tool_validates_tools() {
        let client = native_client();
        let result = client
            .ask_tool(&[], "", "", &[json!({"no_type": true})], ToolChoice::Auto)
            .await;
        assert!(matches!(result, Err(Error::Invalid(_))));

        let result = client.ask_tool(&[], "", "", &[], ToolChoice::Required).await;
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn usage_counters_accumulate_and_reset() {
        let client = native_client();
        client.accumulate_usage(&json!({
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }));
        client.accumulate_usage(&json!({
            "usage": {"prompt_tokens": 3, "completion_tokens": 2}
        }));
        assert_eq!(
            client.usage(),
            TokenUsage {
                prompt_tokens: 13,
                completion_tokens: 7
            }
        );
        client.reset_usage();
        assert_eq!(client.usage(), TokenUsage::default());
    }
}
