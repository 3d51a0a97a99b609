//! Planning: in-memory CRUD over stepped plans.
//!
//! Plans live in a table inside the tool; the planning flow drives them via
//! forced tool calls and reads them back through [`Planning::snapshot`].
//! Invariant: steps, statuses, and notes stay the same length at every
//! observable point.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mentis_core::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Status of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "not_started",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(StepStatus::NotStarted),
            "in_progress" => Some(StepStatus::InProgress),
            "completed" => Some(StepStatus::Completed),
            "blocked" => Some(StepStatus::Blocked),
            _ => None,
        }
    }

    fn marker(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "[ ]",
            StepStatus::InProgress => "[→]",
            StepStatus::Completed => "[✓]",
            StepStatus::Blocked => "[!]",
        }
    }
}

/// A stepped plan with per-step status and notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub title: String,
    pub steps: Vec<String>,
    pub step_statuses: Vec<StepStatus>,
    pub step_notes: Vec<String>,
}

impl Plan {
    fn new(plan_id: String, title: String, steps: Vec<String>) -> Self {
        let count = steps.len();
        Self {
            plan_id,
            title,
            steps,
            step_statuses: vec![StepStatus::NotStarted; count],
            step_notes: vec![String::new(); count],
        }
    }

    fn count(&self, status: StepStatus) -> usize {
        self.step_statuses.iter().filter(|s| **s == status).count()
    }

    pub fn is_complete(&self) -> bool {
        self.step_statuses
            .iter()
            .all(|s| *s == StepStatus::Completed)
    }

    /// Human-readable rendering with progress counts and per-step markers.
    pub fn format(&self) -> String {
        let header = format!("Plan: {} (ID: {})\n", self.title, self.plan_id);
        let mut out = header.clone();
        out.push_str(&"=".repeat(header.len().saturating_sub(1)));
        out.push_str("\n\n");

        let total = self.steps.len();
        let completed = self.count(StepStatus::Completed);
        let percentage = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        out.push_str(&format!(
            "Progress: {completed}/{total} steps completed ({percentage:.1}%)\n"
        ));
        out.push_str(&format!(
            "Status: {} completed, {} in progress, {} blocked, {} not started\n\n",
            completed,
            self.count(StepStatus::InProgress),
            self.count(StepStatus::Blocked),
            self.count(StepStatus::NotStarted),
        ));
        out.push_str("Steps:\n");
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{i}. {} {step}\n", self.step_statuses[i].marker()));
            if !self.step_notes[i].is_empty() {
                out.push_str(&format!("    Notes: {}\n", self.step_notes[i]));
            }
        }
        out
    }
}

#[derive(Default)]
struct PlanningState {
    plans: HashMap<String, Plan>,
    active: Option<String>,
}

/// The planning tool: create/update/list/get/set_active/mark_step/delete
/// over an in-memory plan table.
#[derive(Default)]
pub struct Planning {
    state: Mutex<PlanningState>,
}

impl Planning {
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time copy of one plan.
    pub fn snapshot(&self, plan_id: &str) -> Option<Plan> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.plans.get(plan_id).cloned()
    }

    pub fn contains(&self, plan_id: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.plans.contains_key(plan_id)
    }

    fn create(&self, plan_id: &str, title: &str, steps: Vec<String>) -> ToolResult {
        if plan_id.is_empty() {
            return ToolResult::error("Parameter `plan_id` is required for command: create");
        }
        if title.is_empty() {
            return ToolResult::error("Parameter `title` is required for command: create");
        }
        if steps.is_empty() {
            return ToolResult::error(
                "Parameter `steps` must be a non-empty list of strings for command: create",
            );
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.plans.contains_key(plan_id) {
            return ToolResult::error(format!(
                "Plan with ID {plan_id} already exists. Use 'update' to modify existing plans."
            ));
        }

        let plan = Plan::new(plan_id.to_string(), title.to_string(), steps);
        let rendered = plan.format();
        state.plans.insert(plan_id.to_string(), plan);
        state.active = Some(plan_id.to_string());

        ToolResult::new(format!(
            "Plan created successfully with ID: {plan_id}\n\n{rendered}"
        ))
    }

    fn update(&self, plan_id: &str, title: &str, steps: Vec<String>) -> ToolResult {
        if plan_id.is_empty() {
            return ToolResult::error("Parameter `plan_id` is required for command: update");
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(plan) = state.plans.get_mut(plan_id) else {
            return ToolResult::error(format!("No plan found with ID: {plan_id}"));
        };

        if !title.is_empty() {
            plan.title = title.to_string();
        }
        if !steps.is_empty() {
            // Preserve status and notes of step slots whose text is
            // unchanged; changed slots reset to not_started.
            let mut new_statuses = Vec::with_capacity(steps.len());
            let mut new_notes = Vec::with_capacity(steps.len());
            for (i, step) in steps.iter().enumerate() {
                if plan.steps.get(i) == Some(step) {
                    new_statuses.push(plan.step_statuses[i]);
                    new_notes.push(plan.step_notes[i].clone());
                } else {
                    new_statuses.push(StepStatus::NotStarted);
                    new_notes.push(String::new());
                }
            }
            plan.steps = steps;
            plan.step_statuses = new_statuses;
            plan.step_notes = new_notes;
        }

        let rendered = plan.format();
        ToolResult::new(format!(
            "Plan updated successfully with ID: {plan_id}\n\n{rendered}"
        ))
    }

    fn list(&self) -> ToolResult {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.plans.is_empty() {
            return ToolResult::new("No plans available. Create a plan with the 'create' command.");
        }
        let mut ids: Vec<&String> = state.plans.keys().collect();
        ids.sort();

        let mut out = String::from("Available plans:\n");
        for id in ids {
            let plan = &state.plans[id];
            let active_marker = if state.active.as_deref() == Some(id.as_str()) {
                " (active)"
            } else {
                ""
            };
            out.push_str(&format!(
                "• {id}{active_marker}: {} - {}/{} steps completed\n",
                plan.title,
                plan.count(StepStatus::Completed),
                plan.steps.len(),
            ));
        }
        ToolResult::new(out)
    }

    fn resolve_id(&self, plan_id: &str, state: &PlanningState) -> Result<String, ToolResult> {
        if !plan_id.is_empty() {
            return Ok(plan_id.to_string());
        }
        state.active.clone().ok_or_else(|| {
            ToolResult::error("No active plan. Please specify a plan_id or set an active plan.")
        })
    }

    fn get(&self, plan_id: &str) -> ToolResult {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let plan_id = match self.resolve_id(plan_id, &state) {
            Ok(id) => id,
            Err(error) => return error,
        };
        match state.plans.get(&plan_id) {
            Some(plan) => ToolResult::new(plan.format()),
            None => ToolResult::error(format!("No plan found with ID: {plan_id}")),
        }
    }

    fn set_active(&self, plan_id: &str) -> ToolResult {
        if plan_id.is_empty() {
            return ToolResult::error("Parameter `plan_id` is required for command: set_active");
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(plan) = state.plans.get(plan_id) else {
            return ToolResult::error(format!("No plan found with ID: {plan_id}"));
        };
        let rendered = plan.format();
        state.active = Some(plan_id.to_string());
        ToolResult::new(format!(
            "Plan '{plan_id}' is now the active plan.\n\n{rendered}"
        ))
    }

    fn mark_step(
        &self,
        plan_id: &str,
        step_index: Option<i64>,
        step_status: &str,
        step_notes: &str,
    ) -> ToolResult {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let plan_id = match self.resolve_id(plan_id, &state) {
            Ok(id) => id,
            Err(error) => return error,
        };
        let Some(plan) = state.plans.get_mut(&plan_id) else {
            return ToolResult::error(format!("No plan found with ID: {plan_id}"));
        };

        let step_count = plan.steps.len() as i64;
        let index = match step_index {
            Some(index) if index >= 0 && index < step_count => index as usize,
            Some(index) => {
                return ToolResult::error(format!(
                    "Invalid step index: {index}. Valid indices range from 0 to {}",
                    step_count - 1
                ))
            }
            None => {
                return ToolResult::error("Parameter `step_index` is required for command: mark_step")
            }
        };

        if !step_status.is_empty() {
            let Some(status) = StepStatus::parse(step_status) else {
                return ToolResult::error(format!(
                    "Invalid step status: {step_status}. Valid statuses are: not_started, in_progress, completed, blocked"
                ));
            };
            plan.step_statuses[index] = status;
        }
        if !step_notes.is_empty() {
            plan.step_notes[index] = step_notes.to_string();
        }

        let rendered = plan.format();
        ToolResult::new(format!(
            "Step {index} updated in plan '{plan_id}'.\n\n{rendered}"
        ))
    }

    fn delete(&self, plan_id: &str) -> ToolResult {
        if plan_id.is_empty() {
            return ToolResult::error("Parameter `plan_id` is required for command: delete");
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.plans.remove(plan_id).is_none() {
            return ToolResult::error(format!("No plan found with ID: {plan_id}"));
        }
        if state.active.as_deref() == Some(plan_id) {
            state.active = None;
        }
        ToolResult::new(format!("Plan '{plan_id}' has been deleted."))
    }
}

#[async_trait]
impl Tool for Planning {
    fn name(&self) -> &str {
        "planning"
    }

    fn description(&self) -> &str {
        "A planning tool that allows the agent to create and manage plans for solving complex \
         tasks. The tool provides functionality for creating plans, updating plan steps, and \
         tracking progress."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute.",
                    "enum": ["create", "update", "list", "get", "set_active", "mark_step", "delete"]
                },
                "plan_id": {
                    "type": "string",
                    "description": "Unique identifier for the plan. Required for create, update, set_active, and delete commands. Optional for get and mark_step (uses active plan if not specified)."
                },
                "title": {
                    "type": "string",
                    "description": "Title for the plan. Required for create command, optional for update command."
                },
                "steps": {
                    "type": "array",
                    "description": "List of plan steps. Required for create command, optional for update command.",
                    "items": {"type": "string"}
                },
                "step_index": {
                    "type": "integer",
                    "description": "Index of the step to update (0-based). Required for mark_step command."
                },
                "step_status": {
                    "type": "string",
                    "description": "Status to set for a step.",
                    "enum": ["not_started", "in_progress", "completed", "blocked"]
                },
                "step_notes": {
                    "type": "string",
                    "description": "Additional notes for a step. Optional for mark_step command."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let command = arguments["command"].as_str().unwrap_or_default();
        let plan_id = arguments["plan_id"].as_str().unwrap_or_default();
        let title = arguments["title"].as_str().unwrap_or_default();
        let steps: Vec<String> = arguments["steps"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let step_index = arguments["step_index"].as_i64();
        let step_status = arguments["step_status"].as_str().unwrap_or_default();
        let step_notes = arguments["step_notes"].as_str().unwrap_or_default();

        match command {
            "create" => self.create(plan_id, title, steps),
            "update" => self.update(plan_id, title, steps),
            "list" => self.list(),
            "get" => self.get(plan_id),
            "set_active" => self.set_active(plan_id),
            "mark_step" => self.mark_step(plan_id, step_index, step_status, step_notes),
            "delete" => self.delete(plan_id),
            other => ToolResult::error(format!(
                "Unrecognized command: {other}. Allowed commands are: create, update, list, get, set_active, mark_step, delete"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_initializes_parallel_arrays() {
        let planning = Planning::new();
        let result = planning.create("p1", "Test plan", steps(&["one", "two"]));
        assert!(!result.is_error());

        let plan = planning.snapshot("p1").unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.step_statuses.len(), 2);
        assert_eq!(plan.step_notes.len(), 2);
        assert!(plan.step_statuses.iter().all(|s| *s == StepStatus::NotStarted));
    }

    #[test]
    fn create_rejects_duplicates_and_missing_fields() {
        let planning = Planning::new();
        planning.create("p1", "Plan", steps(&["s"]));

        assert!(planning.create("p1", "Again", steps(&["s"])).is_error());
        assert!(planning.create("", "Plan", steps(&["s"])).is_error());
        assert!(planning.create("p2", "", steps(&["s"])).is_error());
        assert!(planning.create("p2", "Plan", vec![]).is_error());
    }

    #[test]
    fn mark_step_validates_index_and_status() {
        let planning = Planning::new();
        planning.create("p1", "Plan", steps(&["a", "b"]));

        let bad_index = planning.mark_step("p1", Some(5), "completed", "");
        assert!(bad_index.is_error());
        assert!(bad_index.to_text().contains("Invalid step index"));

        let negative = planning.mark_step("p1", Some(-1), "completed", "");
        assert!(negative.is_error());

        let bad_status = planning.mark_step("p1", Some(0), "done", "");
        assert!(bad_status.is_error());
        assert!(bad_status.to_text().contains("Invalid step status"));

        planning.mark_step("p1", Some(0), "in_progress", "working on it");
        let plan = planning.snapshot("p1").unwrap();
        assert_eq!(plan.step_statuses[0], StepStatus::InProgress);
        assert_eq!(plan.step_notes[0], "working on it");
    }

    #[test]
    fn update_preserves_unchanged_step_slots() {
        let planning = Planning::new();
        planning.create("p1", "Plan", steps(&["keep", "replace"]));
        planning.mark_step("p1", Some(0), "completed", "done early");
        planning.mark_step("p1", Some(1), "in_progress", "");

        planning.update("p1", "", steps(&["keep", "different", "extra"]));

        let plan = planning.snapshot("p1").unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.step_statuses[0], StepStatus::Completed);
        assert_eq!(plan.step_notes[0], "done early");
        assert_eq!(plan.step_statuses[1], StepStatus::NotStarted);
        assert_eq!(plan.step_notes[1], "");
        assert_eq!(plan.step_statuses[2], StepStatus::NotStarted);
    }

    #[test]
    fn get_defaults_to_active_plan() {
        let planning = Planning::new();
        planning.create("p1", "First", steps(&["a"]));
        planning.create("p2", "Second", steps(&["b"]));

        // p2 became active on creation.
        let rendered = planning.get("").to_text();
        assert!(rendered.contains("Second"));

        planning.set_active("p1");
        let rendered = planning.get("").to_text();
        assert!(rendered.contains("First"));
    }

    #[test]
    fn delete_clears_active_reference() {
        let planning = Planning::new();
        planning.create("p1", "Plan", steps(&["a"]));
        planning.delete("p1");

        assert!(planning.snapshot("p1").is_none());
        assert!(planning.get("").is_error());
        assert!(planning.delete("p1").is_error());
    }

    #[test]
    fn format_shows_progress_and_markers() {
        let planning = Planning::new();
        planning.create("p1", "Render", steps(&["first", "second"]));
        planning.mark_step("p1", Some(0), "completed", "note here");

        let rendered = planning.snapshot("p1").unwrap().format();
        assert!(rendered.contains("Progress: 1/2 steps completed (50.0%)"));
        assert!(rendered.contains("[✓] first"));
        assert!(rendered.contains("[ ] second"));
        assert!(rendered.contains("Notes: note here"));
    }

    #[tokio::test]
    async fn execute_dispatches_commands() {
        let planning = Planning::new();
        let created = planning
            .execute(json!({
                "command": "create",
                "plan_id": "p1",
                "title": "Via tool",
                "steps": ["only step"],
            }))
            .await;
        assert!(!created.is_error());

        let listed = planning.execute(json!({"command": "list"})).await;
        assert!(listed.to_text().contains("p1 (active)"));

        let unknown = planning.execute(json!({"command": "zap"})).await;
        assert!(unknown.is_error());
    }
}
