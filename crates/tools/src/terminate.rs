//! Terminate: the tool that ends an agent run.

use async_trait::async_trait;
use mentis_core::{Tool, ToolResult};
use serde_json::{json, Value};

/// Ends the interaction. Registered as a special tool by default, so a
/// successful call transitions the agent to Finished.
#[derive(Default)]
pub struct Terminate;

impl Terminate {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for Terminate {
    fn name(&self) -> &str {
        "terminate"
    }

    fn description(&self) -> &str {
        "Terminate the interaction when the request is met OR if the assistant cannot proceed \
         further with the task."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "description": "The finish status of the interaction.",
                    "enum": ["success", "failure"]
                }
            },
            "required": ["status"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let status = arguments["status"].as_str().unwrap_or("unknown");
        ToolResult::new(format!(
            "The interaction has been completed with status: {status}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_the_finish_status() {
        let tool = Terminate::new();
        let result = tool.execute(json!({"status": "success"})).await;
        assert_eq!(
            result.to_text(),
            "The interaction has been completed with status: success"
        );

        let result = tool.execute(json!({})).await;
        assert!(result.to_text().contains("unknown"));
    }
}
