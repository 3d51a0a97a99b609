//! MCP client: initialize handshake, tool discovery, tool invocation.

use std::sync::atomic::{AtomicU64, Ordering};

use mentis_config::{McpServerConfig, McpTransportKind};
use mentis_core::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::transport::{JsonRpcRequest, McpTransport, SseTransport, StdioTransport};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// One entry of a remote tool catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ListToolsResult {
    tools: Vec<McpToolInfo>,
}

/// Result of a `tools/call`: raw content parts plus the error flag.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// A connected MCP server. Reusable across calls; the initialize handshake
/// has completed before the client is handed out.
pub struct McpClient {
    server_name: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    /// Build the transport described by `config`, run the initialize
    /// handshake, and return a ready client.
    pub async fn connect(server_name: &str, config: &McpServerConfig) -> Result<Self> {
        let transport: Box<dyn McpTransport> = match config.kind {
            McpTransportKind::Stdio => Box::new(StdioTransport::spawn(
                &config.command,
                &config.args,
                &config.env,
            )?),
            McpTransportKind::Sse => {
                let base = match (&config.url, &config.host, config.port) {
                    (Some(url), _, _) => url.clone(),
                    (None, Some(host), Some(port)) => format!("http://{host}:{port}"),
                    _ => {
                        return Err(Error::Config(format!(
                            "MCP SSE configuration for `{server_name}` missing host or port or url"
                        )))
                    }
                };
                Box::new(SseTransport::connect(&base, "/sse").await?)
            }
        };

        let client = Self {
            server_name: server_name.to_string(),
            transport,
            next_id: AtomicU64::new(1),
        };
        client.initialize().await?;
        Ok(client)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = JsonRpcRequest::call(self.fresh_id(), method, params);
        let response = self.transport.send(request).await?;
        if let Some(error) = response.error {
            return Err(Error::Tool(format!(
                "{method} failed: {} (code {})",
                error.message, error.code
            )));
        }
        Ok(response.result.unwrap_or_default())
    }

    async fn initialize(&self) -> Result<()> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": format!("{}_client", self.server_name),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await?;
        debug!(server = %self.server_name, result = %result, "MCP initialize complete");

        self.transport
            .notify(JsonRpcRequest::notification(
                "notifications/initialized",
                None,
            ))
            .await?;
        info!(server = %self.server_name, "MCP client ready");
        Ok(())
    }

    /// The remote tool catalog.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let result = self.request("tools/list", None).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| Error::Tool(format!("Failed to parse tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    /// Invoke a remote tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let result = self
            .request(
                "tools/call",
                Some(json!({"name": name, "arguments": arguments})),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| Error::Tool(format!("Failed to parse tools/call result: {e}")))
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

/// Resolve an MCP server by config name from the global configuration.
pub async fn connect_named(server_name: &str) -> Result<McpClient> {
    let config = mentis_config::global()
        .mcp_server_config(server_name)
        .map_err(|e| Error::Config(e.to_string()))?
        .clone();
    McpClient::connect(server_name, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_info_deserialization() {
        let frame = r#"{
            "name": "read_file",
            "description": "Read a file from disk",
            "inputSchema": {
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }
        }"#;
        let info: McpToolInfo = serde_json::from_str(frame).unwrap();
        assert_eq!(info.name, "read_file");
        assert_eq!(info.description.as_deref(), Some("Read a file from disk"));
        assert_eq!(info.input_schema["type"], "object");
    }

    #[test]
    fn call_result_error_flag_defaults_false() {
        let frame = r#"{"content":[{"type":"text","text":"ok"}]}"#;
        let result: CallToolResult = serde_json::from_str(frame).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);

        let frame = r#"{"content":[{"type":"text","text":"bad"}],"isError":true}"#;
        let result: CallToolResult = serde_json::from_str(frame).unwrap();
        assert!(result.is_error);
    }
}
