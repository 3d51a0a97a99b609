//! The planning flow: a meta-executor over one or more agents.
//!
//! The flow asks the LLM for a stepped plan (forced `planning` tool call),
//! then walks the steps: each step is dispatched to the executor selected
//! by its `[TAG]` (or the primary agent), the executor's transcript is
//! summarized by the LLM, and the executor's short-term memory is replaced
//! with that summary so context does not explode across steps.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mentis_agent::ToolCallAgent;
use mentis_core::message::Message;
use mentis_core::provider::{ChatClient, ToolChoice};
use mentis_core::state::AgentState;
use mentis_core::tool::Tool;
use mentis_tools::{Planning, StepStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// Fallback steps when the LLM fails to produce a plan.
const DEFAULT_PLAN_STEPS: [&str; 3] = ["Analyze request", "Execute task", "Verify results"];

/// The first open step of a plan: its index, full text, and optional tag.
struct StepInfo {
    index: usize,
    text: String,
    tag: Option<String>,
}

/// Coordinates plan creation and step-by-step agent execution.
pub struct PlanningFlow {
    llm: Arc<dyn ChatClient>,
    agents: HashMap<String, ToolCallAgent>,
    primary_agent_key: String,
    planning: Planning,
    active_plan_id: String,
    current_step_index: Option<usize>,
}

impl PlanningFlow {
    pub fn new(
        llm: Arc<dyn ChatClient>,
        agents: HashMap<String, ToolCallAgent>,
        primary_agent_key: impl Into<String>,
    ) -> Self {
        let mut primary_agent_key = primary_agent_key.into();
        if primary_agent_key.is_empty() {
            // Fall back to any registered agent.
            if let Some(key) = agents.keys().next() {
                primary_agent_key = key.clone();
            }
        }
        Self {
            llm,
            agents,
            primary_agent_key,
            planning: Planning::new(),
            active_plan_id: fresh_plan_id(),
            current_step_index: None,
        }
    }

    pub fn add_agent(&mut self, key: impl Into<String>, agent: ToolCallAgent) {
        self.agents.insert(key.into(), agent);
    }

    pub fn planning(&self) -> &Planning {
        &self.planning
    }

    pub fn active_plan_id(&self) -> &str {
        &self.active_plan_id
    }

    /// Index of the step currently being executed, if any.
    pub fn current_step_index(&self) -> Option<usize> {
        self.current_step_index
    }

    /// The executor registered under a step tag, else the primary agent.
    fn executor_key(&self, tag: Option<&str>) -> String {
        match tag {
            Some(tag) if self.agents.contains_key(tag) => tag.to_string(),
            _ => self.primary_agent_key.clone(),
        }
    }

    /// Run the flow: create a plan for `input`, then drive agents through
    /// the steps until the plan is exhausted or an executor fails.
    pub async fn execute(&mut self, input: &str) -> String {
        if !self.agents.contains_key(&self.primary_agent_key) {
            return "Execution failed: No primary agent available".into();
        }

        if !input.is_empty() {
            self.create_initial_plan(input).await;
            if !self.planning.contains(&self.active_plan_id) {
                error!(
                    plan_id = %self.active_plan_id,
                    "Plan creation failed. Plan ID not found in planning tool."
                );
                return format!("Failed to create plan for: {input}");
            }
        }

        let mut result = String::new();
        loop {
            let Some(step) = self.next_open_step().await else {
                break;
            };
            self.current_step_index = Some(step.index);

            let key = self.executor_key(step.tag.as_deref());
            let step_result = self.execute_step(&key, &step).await;

            // A finished executor resolves to Idle inside run(); seeing
            // Finished or Error here means the step did not complete
            // normally.
            let state = self
                .agents
                .get(&key)
                .map(|a| a.state())
                .unwrap_or(AgentState::Error);
            if state == AgentState::Finished || state == AgentState::Error {
                break;
            }

            // Summarize the transcript and compact the executor's memory so
            // context stays bounded across steps. The clear may flush the
            // window into long-term memory.
            let transcript = match self.agents.get(&key) {
                Some(agent) => agent.memory().get_messages(&step_result).await,
                None => Vec::new(),
            };
            let summary = self.summarize_plan(&transcript).await;

            if let Some(executor) = self.agents.get_mut(&key) {
                executor.reset(true).await;
                executor.push_memory(Message::assistant(summary.clone())).await;
                if !input.is_empty() {
                    executor
                        .push_memory(Message::user(format!(
                            "Continue to accomplish the task: {input}"
                        )))
                        .await;
                }
            }

            let header = step.tag.clone().unwrap_or_else(|| step.text.clone());
            result.push_str(&format!("## {header}:\n{summary}\n\n"));
        }

        self.reset(true).await;
        result
    }

    /// Ask the LLM to create the plan via a forced `planning` call; fall
    /// back to a default plan when that fails.
    async fn create_initial_plan(&mut self, request: &str) {
        info!(plan_id = %self.active_plan_id, "Creating initial plan");

        let system_prompt =
            "You are a planning assistant. Your task is to create a detailed plan with clear steps.";
        let mut user_prompt =
            format!("Please provide a detailed plan to accomplish this task: {request}\n\n");
        user_prompt.push_str("**Note**: The following executors will be used to accomplish the plan.\n\n");
        let mut keys: Vec<&String> = self.agents.keys().collect();
        keys.sort();
        for key in keys {
            let params = self.agents[key].tools().to_params();
            user_prompt.push_str(&format!(
                "Available tools for executor `{key}`:\n{}\n\n",
                serde_json::to_string_pretty(&params).unwrap_or_default()
            ));
        }

        let response = self
            .llm
            .ask_tool(
                &[Message::user(user_prompt)],
                system_prompt,
                "",
                &[self.planning.to_param()],
                ToolChoice::Required,
            )
            .await;

        if let Ok(response) = response {
            for call in &response.tool_calls {
                if call.function.name != "planning" {
                    continue;
                }
                let mut arguments = match &call.function.arguments {
                    Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                        Ok(parsed) => parsed,
                        Err(_) => {
                            error!("Failed to parse planning tool arguments");
                            continue;
                        }
                    },
                    other => other.clone(),
                };
                // The flow owns the plan id; the model does not get a vote.
                arguments["plan_id"] = json!(self.active_plan_id);

                let result = self.planning.execute(arguments).await;
                info!("Plan creation result: {}", result.to_text_truncated(500));
                return;
            }
        }

        warn!("Creating default plan");
        let title: String = if request.chars().count() > 50 {
            let truncated: String = request.chars().take(50).collect();
            format!("{truncated}...")
        } else {
            request.to_string()
        };
        self.planning
            .execute(json!({
                "command": "create",
                "plan_id": self.active_plan_id,
                "title": title,
                "steps": DEFAULT_PLAN_STEPS,
            }))
            .await;
    }

    /// Find the first not_started/in_progress step, mark it in_progress,
    /// and extract its `[TAG]`.
    async fn next_open_step(&self) -> Option<StepInfo> {
        static TAG_PATTERN: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"\[([A-Z_]+)\]").expect("valid step-tag pattern"));

        let plan = self.planning.snapshot(&self.active_plan_id)?;
        for (index, step) in plan.steps.iter().enumerate() {
            let status = plan.step_statuses.get(index).copied()?;
            if status != StepStatus::NotStarted && status != StepStatus::InProgress {
                continue;
            }
            let tag = TAG_PATTERN
                .captures(step)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());

            // Mark it in_progress before handing it to an executor.
            let marked = self
                .planning
                .execute(json!({
                    "command": "mark_step",
                    "plan_id": self.active_plan_id,
                    "step_index": index,
                    "step_status": "in_progress",
                }))
                .await;
            if marked.is_error() {
                error!(index, "Error marking step as in_progress: {}", marked.to_text());
            } else {
                info!(plan_id = %self.active_plan_id, index, "Started executing step");
            }

            return Some(StepInfo {
                index,
                text: step.clone(),
                tag,
            });
        }
        None
    }

    /// Run one step on the chosen executor and mark it completed unless
    /// the executor errored.
    async fn execute_step(&mut self, key: &str, step: &StepInfo) -> String {
        let plan_status = self.plan_text();
        let step_prompt = format!(
            "\nCURRENT PLAN STATUS:\n{plan_status}\n\nYOUR CURRENT TASK:\nYou are now working \
             on step {}: \"{}\"\nPlease execute this step using the appropriate tools. When \
             you're done, provide a summary of what you accomplished and call `terminate` to \
             trigger the next step.",
            step.index, step.text
        );

        let Some(executor) = self.agents.get_mut(key) else {
            return format!("Error executing step {}: no executor `{key}`", step.index);
        };
        let step_result = executor.run(&step_prompt).await;

        if executor.state() != AgentState::Error {
            self.mark_step_completed(step.index).await;
        }
        step_result
    }

    async fn mark_step_completed(&self, index: usize) {
        let result = self
            .planning
            .execute(json!({
                "command": "mark_step",
                "plan_id": self.active_plan_id,
                "step_index": index,
                "step_status": "completed",
            }))
            .await;
        if result.is_error() {
            warn!(index, "Failed to update plan status: {}", result.to_text());
        } else {
            info!(plan_id = %self.active_plan_id, index, "Marked step as completed");
        }
    }

    fn plan_text(&self) -> String {
        match self.planning.snapshot(&self.active_plan_id) {
            Some(plan) => plan.format(),
            None => format!("Error: Plan with ID {} not found", self.active_plan_id),
        }
    }

    /// Summarize an executor transcript against the current plan status.
    async fn summarize_plan(&self, transcript: &[Message]) -> String {
        let plan_text = self.plan_text();
        let system_prompt =
            "You are a planning assistant. Your task is to summarize the current plan.";
        let next_step_prompt = format!(
            "Above is the nearest finished step in the plan. Here is the current plan \
             status:\n\n{plan_text}\n\nPlease provide a summary of what was accomplished and \
             any thoughts for next steps (when the plan is not fully finished)."
        );

        match self.llm.ask(transcript, system_prompt, &next_step_prompt).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Error summarizing plan with LLM");
                "Error generating summary.".into()
            }
        }
    }

    /// Fresh plan id, cleared step pointer, all agents reset.
    pub async fn reset(&mut self, reset_memory: bool) {
        self.active_plan_id = fresh_plan_id();
        self.current_step_index = None;
        for agent in self.agents.values_mut() {
            agent.reset(reset_memory).await;
        }
    }
}

fn fresh_plan_id() -> String {
    format!("plan_{}", Utc::now().timestamp_millis())
}
