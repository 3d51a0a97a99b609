//! Remote MCP tools surfaced through the local Tool trait.
//!
//! A remote tool is indistinguishable from a local one: `execute` forwards
//! the arguments over the client and translates the response. Image content
//! parts are rewritten into data-URL `image_url` parts so downstream
//! consumers see one uniform shape.

use std::sync::Arc;

use async_trait::async_trait;
use mentis_config::McpServerConfig;
use mentis_core::{Result, Tool, ToolResult};
use serde_json::{json, Value};
use tracing::info;

use crate::client::{McpClient, McpToolInfo};

/// A tool hosted by a remote MCP server.
pub struct McpTool {
    name: String,
    description: String,
    parameters: Value,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(info: McpToolInfo, client: Arc<McpClient>) -> Self {
        let description = info
            .description
            .unwrap_or_else(|| format!("MCP tool `{}` from `{}`", info.name, client.server_name()));
        Self {
            name: info.name,
            description,
            parameters: info.input_schema,
            client,
        }
    }
}

/// Rewrite raw MCP content parts into the uniform local shape: `image`
/// parts become `image_url` parts with a base64 data URL, everything else
/// passes through.
pub fn normalize_content(items: Vec<Value>) -> Value {
    let normalized: Vec<Value> = items
        .into_iter()
        .map(|item| {
            if item.get("type").and_then(Value::as_str) == Some("image") {
                let data = item.get("data").and_then(Value::as_str).unwrap_or_default();
                let mime = item
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{mime};base64,{data}")}
                })
            } else {
                item
            }
        })
        .collect();
    Value::Array(normalized)
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        match self.client.call_tool(&self.name, arguments).await {
            Ok(result) => {
                let content = normalize_content(result.content);
                if result.is_error {
                    ToolResult::error(content)
                } else {
                    ToolResult::new(content)
                }
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// Connect to an MCP server and materialize its catalog as local tools.
pub async fn load_tools(
    server_name: &str,
    config: &McpServerConfig,
) -> Result<Vec<Arc<dyn Tool>>> {
    let client = Arc::new(McpClient::connect(server_name, config).await?);
    let infos = client.list_tools().await?;
    info!(server = server_name, count = infos.len(), "Loaded MCP tool catalog");
    Ok(infos
        .into_iter()
        .map(|info| Arc::new(McpTool::new(info, client.clone())) as Arc<dyn Tool>)
        .collect())
}
