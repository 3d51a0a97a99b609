//! The tool-call agent: a think/act loop over a tool collection.
//!
//! Think asks the LLM for the next tool-call batch; act dispatches each
//! call through the collection, spilling oversized observations to the
//! content provider so they do not blow the token budget of future LLM
//! calls. A special tool (by default only `terminate`) finishes the run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use mentis_config::McpServerConfig;
use mentis_core::message::{Message, MessageContent, ToolCall};
use mentis_core::provider::{ChatClient, TokenUsage, ToolChoice};
use mentis_core::state::AgentState;
use mentis_core::tool::{Tool, ToolCollection, ToolResult};
use mentis_core::{Error, Result};
use mentis_memory::Memory;
use mentis_tools::{ContentProvider, Terminate};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::prompts;
use crate::stuck;

/// Serialized tool results beyond this size spill to the content provider.
const MAX_RESULT_CHARS: usize = 12_288;

/// Tool messages beyond this token count spill as well.
const MAX_TOOL_MESSAGE_TOKENS: usize = 4096;

const DEFAULT_MAX_STEPS: usize = 30;
const DEFAULT_DUPLICATE_THRESHOLD: usize = 2;

/// An agent that drives an LLM through think/act cycles and executes the
/// tool calls it emits. Owns its memory and tool collection exclusively;
/// one instance serves one session.
pub struct ToolCallAgent {
    name: String,
    description: String,
    system_prompt: String,
    next_step_prompt: String,

    llm: Arc<dyn ChatClient>,
    memory: Memory,
    state: AgentState,

    max_steps: usize,
    current_step: usize,
    duplicate_threshold: usize,

    available_tools: ToolCollection,
    tool_choice: ToolChoice,
    special_tool_names: HashSet<String>,

    /// The batch emitted by the latest think().
    tool_calls: Vec<ToolCall>,
}

impl ToolCallAgent {
    /// Create an agent with the default tool set (content provider +
    /// terminate).
    pub fn new(llm: Arc<dyn ChatClient>, memory: Memory) -> Self {
        Self::with_tools(llm, memory, mentis_tools::default_collection())
    }

    /// Create an agent around a custom tool collection. The terminate and
    /// content-provider tools are added when missing; the spill path and
    /// the default special tool depend on them.
    pub fn with_tools(
        llm: Arc<dyn ChatClient>,
        memory: Memory,
        mut available_tools: ToolCollection,
    ) -> Self {
        if !available_tools.contains("terminate") {
            available_tools.add_tool(Arc::new(Terminate::new()));
        }
        if !available_tools.contains("content_provider") {
            available_tools.add_tool(Arc::new(ContentProvider::new()));
        }

        Self {
            name: "toolcall".into(),
            description: "an agent that can execute tool calls.".into(),
            system_prompt: prompts::SYSTEM_PROMPT.into(),
            next_step_prompt: prompts::NEXT_STEP_PROMPT.into(),
            llm,
            memory,
            state: AgentState::Idle,
            max_steps: DEFAULT_MAX_STEPS,
            current_step: 0,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            available_tools,
            tool_choice: ToolChoice::Auto,
            special_tool_names: HashSet::from(["terminate".to_string()]),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.name = name.into();
        self.description = description.into();
        self
    }

    pub fn with_prompts(
        mut self,
        system_prompt: impl Into<String>,
        next_step_prompt: impl Into<String>,
    ) -> Self {
        self.system_prompt = system_prompt.into();
        self.next_step_prompt = next_step_prompt.into();
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_duplicate_threshold(mut self, duplicate_threshold: usize) -> Self {
        self.duplicate_threshold = duplicate_threshold;
        self
    }

    /// Load a remote tool catalog into the collection.
    pub async fn add_mcp_tools(
        &mut self,
        server_name: &str,
        config: &McpServerConfig,
    ) -> Result<()> {
        let tools = mentis_mcp::load_tools(server_name, config).await?;
        self.available_tools.add_tools(tools);
        Ok(())
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.available_tools.add_tool(tool);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn tools(&self) -> &ToolCollection {
        &self.available_tools
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn llm(&self) -> &Arc<dyn ChatClient> {
        &self.llm
    }

    pub fn usage(&self) -> TokenUsage {
        self.llm.usage()
    }

    /// Drive the think/act loop until a terminal condition. Returns the
    /// step-by-step transcript.
    pub async fn run(&mut self, request: &str) -> String {
        self.memory.current_request = request.to_string();

        if self.state != AgentState::Idle {
            error!(agent = %self.name, state = %self.state, "Cannot run agent");
            return format!("Cannot run agent from state {}", self.state);
        }

        if !request.is_empty() {
            self.memory.add_message(Message::user(request)).await;
        }

        self.state = AgentState::Running;
        let mut results: Vec<String> = Vec::new();

        while self.current_step < self.max_steps && self.state == AgentState::Running {
            self.current_step += 1;
            info!(
                agent = %self.name,
                step = self.current_step,
                max_steps = self.max_steps,
                "Executing step"
            );

            match self.step().await {
                Ok(step_result) => {
                    if self.is_stuck() {
                        self.handle_stuck_state().await;
                    }
                    results.push(format!("Step {}: {step_result}", self.current_step));
                }
                Err(e) => {
                    error!(
                        agent = %self.name,
                        step = self.current_step,
                        error = %e,
                        "Error executing step"
                    );
                    self.state = AgentState::Error;
                    break;
                }
            }
        }

        if self.current_step >= self.max_steps {
            results.push(format!(
                "Terminated: Reached max steps ({})",
                self.max_steps
            ));
        }

        if self.state == AgentState::Finished {
            self.state = AgentState::Idle;
        } else {
            results.push(format!("Terminated: Agent state is {}", self.state));
        }

        if results.is_empty() {
            "No steps executed".into()
        } else {
            results.join("\n")
        }
    }

    /// One think/act cycle.
    async fn step(&mut self) -> Result<String> {
        let should_act = self.think().await?;
        if !should_act {
            return Ok("Thinking complete - no action needed".into());
        }
        self.act().await
    }

    fn render_prompt(&self, template: &str) -> String {
        template
            .replace("{current_date}", &Utc::now().format("%Y-%m-%d").to_string())
            .replace("{current_request}", &self.memory.current_request)
    }

    /// Ask the LLM for the next tool-call batch. Returns whether act()
    /// should run.
    async fn think(&mut self) -> Result<bool> {
        let request = self.memory.current_request.clone();
        let context = self.memory.get_messages(&request).await;
        let system_prompt = self.render_prompt(&self.system_prompt);
        let next_step_prompt = self.render_prompt(&self.next_step_prompt);

        let response = self
            .llm
            .ask_tool(
                &context,
                &system_prompt,
                &next_step_prompt,
                &self.available_tools.to_params(),
                self.tool_choice,
            )
            .await?;
        self.tool_calls = response.tool_calls;

        info!(
            agent = %self.name,
            "Thoughts: {}",
            if response.content.is_empty() {
                "<no content>"
            } else {
                &response.content
            }
        );
        info!(
            agent = %self.name,
            count = self.tool_calls.len(),
            "Selected tools to use"
        );
        if !self.tool_calls.is_empty() {
            let names: Vec<&str> = self
                .tool_calls
                .iter()
                .map(|c| c.function.name.as_str())
                .collect();
            debug!(agent = %self.name, tools = ?names, "Tools being prepared");
        }

        if self.state != AgentState::Running {
            return Ok(false);
        }

        if self.tool_choice == ToolChoice::None {
            if !self.tool_calls.is_empty() {
                warn!(
                    agent = %self.name,
                    "Model emitted tool calls although tools were unavailable"
                );
                self.tool_calls.clear();
            }
            if response.content.is_empty() {
                return Ok(false);
            }
            self.memory
                .add_message(Message::assistant(response.content))
                .await;
            return Ok(true);
        }

        self.memory
            .add_message(Message::assistant_with_tools(
                response.content,
                self.tool_calls.clone(),
            ))
            .await;

        if self.tool_choice == ToolChoice::Required && self.tool_calls.is_empty() {
            return Ok(true); // act() will raise the error
        }
        Ok(!self.tool_calls.is_empty())
    }

    /// Dispatch the pending tool calls in order, recording each observation
    /// as a tool message.
    async fn act(&mut self) -> Result<String> {
        if self.tool_calls.is_empty() {
            if self.tool_choice == ToolChoice::Required {
                return Err(Error::Invalid("Required tools but none selected".into()));
            }
            // Return last message content if no tool calls.
            return Ok(self
                .memory
                .messages()
                .back()
                .filter(|m| !m.content.is_empty())
                .map(|m| m.text())
                .unwrap_or_else(|| "No content or commands to execute".into()));
        }

        let calls = std::mem::take(&mut self.tool_calls);
        let mut observations = String::new();

        for call in &calls {
            let tool_name = call.function.name.clone();

            let mut result = if self.state == AgentState::Running {
                self.execute_tool(call).await
            } else {
                ToolResult::error(
                    "Agent is not running, so no more tool calls will be executed.",
                )
            };

            info!(
                agent = %self.name,
                tool = %tool_name,
                "Tool completed. Result: {}",
                result.to_text_truncated(500)
            );

            // Big results spill to the content provider instead of the
            // window, unless the result is a single image.
            if result.to_text().len() > MAX_RESULT_CHARS && !is_single_image(&result.output) {
                result = self.spill(result.output.clone()).await;
                info!(
                    agent = %self.name,
                    tool = %tool_name,
                    "Tool result split into chunks and saved to memory"
                );
            }

            let content = if result.error.is_null() {
                result.output.clone()
            } else {
                result.error.clone()
            };
            let mut tool_message = Message::tool(
                MessageContent::from_value(&content),
                call.id.as_str(),
                tool_name.as_str(),
            );

            // The resulting tool message itself may still be too heavy.
            if tool_message.num_tokens > MAX_TOOL_MESSAGE_TOKENS {
                let spilled = self.spill(tool_message.content.to_value()).await;
                tool_message = Message::tool(
                    MessageContent::from_value(&spilled.output),
                    call.id.as_str(),
                    tool_name.as_str(),
                );
                info!(
                    agent = %self.name,
                    tool = %tool_name,
                    "Tool message split into chunks and saved to memory"
                );
            }

            self.memory.add_message(tool_message).await;

            let observation = if result.is_empty() {
                format!("Tool `{tool_name}` completed with no output")
            } else {
                format!(
                    "Observed output of tool `{tool_name}` executed:\n{}",
                    result.to_text()
                )
            };
            observations.push_str(&observation);
            observations.push_str("\n\n");
        }

        Ok(observations)
    }

    /// Write oversized content into the content provider and return a
    /// pointer-style result telling the model how to page through it.
    async fn spill(&self, content: Value) -> ToolResult {
        let parts = to_content_parts(content);
        let write_result = self
            .available_tools
            .execute(
                "content_provider",
                json!({"operation": "write", "content": parts}),
            )
            .await;
        if write_result.is_error() {
            return write_result;
        }
        ToolResult::new(format!(
            "This tool call has been split into multiple chunks and saved to memory. Please \
             refer to below information to use the `content_provider` tool to read the chunks:\n{}",
            write_result.to_text()
        ))
    }

    /// Execute a single tool call with robust error handling.
    async fn execute_tool(&mut self, call: &ToolCall) -> ToolResult {
        let name = &call.function.name;
        if name.is_empty() {
            return ToolResult::error("Invalid command format");
        }
        if !self.available_tools.contains(name) {
            return ToolResult::error(format!(
                "Unknown tool `{name}`. Please use one of the following tools: {}",
                self.available_tools.names().join(", ")
            ));
        }

        let arguments = match &call.function.arguments {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(parsed) => parsed,
                Err(_) => {
                    error!(agent = %self.name, tool = %name, "Invalid JSON arguments");
                    return ToolResult::error(format!(
                        "Error parsing arguments for {name}: Invalid JSON format"
                    ));
                }
            },
            other => other.clone(),
        };

        info!(agent = %self.name, tool = %name, "Activating tool");
        let result = self.available_tools.execute(name, arguments).await;
        self.handle_special_tool(name, &result);
        result
    }

    fn handle_special_tool(&mut self, name: &str, result: &ToolResult) {
        if !self.special_tool_names.contains(name) {
            return;
        }
        if Self::should_finish_execution(name, result) {
            info!(agent = %self.name, tool = %name, "Special tool has completed the task");
            self.state = AgentState::Finished;
        }
    }

    /// Whether a special tool ends the run. Today every special tool does;
    /// per-tool logic slots in here.
    fn should_finish_execution(_name: &str, _result: &ToolResult) -> bool {
        true
    }

    fn is_stuck(&self) -> bool {
        stuck::is_stuck(self.memory.messages(), self.duplicate_threshold)
    }

    async fn handle_stuck_state(&mut self) {
        warn!(agent = %self.name, "Agent detected stuck state, nudging strategy change");
        self.memory
            .add_message(Message::user(prompts::STUCK_PROMPT))
            .await;
    }

    /// External interruption: record it and let the loop observe the state
    /// on its next check. No preemption.
    pub async fn interrupt(&mut self) {
        self.memory
            .add_message(Message::user(
                "User interrupted. The current step will finish and the run will stop.",
            ))
            .await;
        self.state = AgentState::Idle;
    }

    /// Zero step and state, reset LLM usage counters, optionally clear the
    /// memory (which may flush to the long-term store).
    pub async fn reset(&mut self, reset_memory: bool) {
        self.current_step = 0;
        self.state = AgentState::Idle;
        self.llm.reset_usage();
        if reset_memory {
            self.memory.clear().await;
        }
    }

    /// Append a message to the agent's memory.
    pub async fn push_memory(&mut self, message: Message) -> bool {
        self.memory.add_message(message).await
    }
}

fn is_single_image(output: &Value) -> bool {
    output
        .as_array()
        .map(|items| {
            items.len() == 1 && items[0].get("type").and_then(Value::as_str) == Some("image_url")
        })
        .unwrap_or(false)
}

/// Normalize arbitrary tool output into a content-part array for the
/// content provider.
fn to_content_parts(content: Value) -> Value {
    match content {
        Value::Array(items) => Value::Array(items),
        Value::String(text) => json!([{"type": "text", "text": text}]),
        other => json!([{"type": "text", "text": mentis_core::content_to_text(&other)}]),
    }
}
