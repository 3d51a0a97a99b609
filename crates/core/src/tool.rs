//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what let the agent act in the world. Local tools run in
//! process; remote tools forward over MCP. Both satisfy the same trait, so
//! callers never see the transport.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::message::content_to_text;

/// The result of a tool execution.
///
/// Each field is either absent (`Null`), a scalar, or an array of typed
/// content parts. `error` non-null means the execution failed; the text is
/// surfaced to the model so it can react.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub error: Value,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub system: Value,
}

impl ToolResult {
    pub fn new(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            error: Value::Null,
            system: Value::Null,
        }
    }

    /// A ToolResult that represents a failure.
    pub fn error(error: impl Into<Value>) -> Self {
        Self {
            output: Value::Null,
            error: error.into(),
            system: Value::Null,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_null() && self.error.is_null() && self.system.is_null()
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }

    /// Concatenate two results field-wise. Scalar fields are promoted to
    /// arrays when both sides are present.
    pub fn combine(self, other: ToolResult) -> ToolResult {
        fn combine_field(lhs: Value, rhs: Value) -> Value {
            if lhs.is_null() {
                return rhs;
            }
            if rhs.is_null() {
                return lhs;
            }
            let mut items = Vec::new();
            match lhs {
                Value::Array(values) => items.extend(values),
                value => items.push(value),
            }
            match rhs {
                Value::Array(values) => items.extend(values),
                value => items.push(value),
            }
            Value::Array(items)
        }

        ToolResult {
            output: combine_field(self.output, other.output),
            error: combine_field(self.error, other.error),
            system: combine_field(self.system, other.system),
        }
    }

    /// Flatten to plain text; an error takes precedence over output.
    pub fn to_text(&self) -> String {
        if !self.error.is_null() {
            format!("Error: {}", content_to_text(&self.error))
        } else {
            content_to_text(&self.output)
        }
    }

    /// Flatten to plain text, truncated to at most `max_length` characters.
    pub fn to_text_truncated(&self, max_length: usize) -> String {
        let mut text = self.to_text();
        if text.len() > max_length {
            let mut cut = max_length;
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...");
        }
        text
    }
}

/// The core Tool trait.
///
/// Tools are registered in a ToolCollection and made available to the agent
/// loop. Failures are reported inside the ToolResult, never as panics.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "terminate", "content_provider").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value) -> ToolResult;

    /// Render this tool as an OpenAI-style function schema.
    fn to_param(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

/// An ordered collection of tools with unique names.
///
/// The agent uses this to render the tool schema for the LLM and to look up
/// and execute tools when the LLM requests them.
#[derive(Default, Clone)]
pub struct ToolCollection {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, Arc<dyn Tool>>,
}

impl ToolCollection {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut collection = Self::default();
        collection.add_tools(tools);
        collection
    }

    /// Register a tool. A duplicate name is rejected with a warning; the
    /// existing registration wins.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            warn!(tool = %name, "Duplicate tool registration ignored");
            return;
        }
        self.by_name.insert(name, tool.clone());
        self.tools.push(tool);
    }

    pub fn add_tools(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.add_tool(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered tool names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the OpenAI-style function-tool schema list for the LLM.
    pub fn to_params(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.to_param()).collect()
    }

    /// Execute a tool by name. An unknown name produces an error result
    /// listing the available tools.
    pub async fn execute(&self, name: &str, arguments: Value) -> ToolResult {
        match self.by_name.get(name) {
            Some(tool) => tool.execute(arguments).await,
            None => ToolResult::error(format!(
                "Unknown tool `{name}`. Please use one of the following tools: {}",
                self.names().join(", ")
            )),
        }
    }
}
