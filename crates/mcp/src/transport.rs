//! MCP transports: JSON-RPC 2.0 over a child process (stdio) or over
//! Server-Sent Events (SSE).
//!
//! The stdio transport launches the configured command and frames one JSON
//! message per line on stdin/stdout. The SSE transport opens a GET event
//! stream; the server's first `endpoint` event names the URL requests are
//! POSTed to, and responses arrive as `message` events correlated by
//! request id.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mentis_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// JSON-RPC request frame.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// A notification: no id, no response expected.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response frame.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Transport layer for MCP communication.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and await its response.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is read.
    async fn notify(&self, request: JsonRpcRequest) -> Result<()>;

    /// Tear the transport down.
    async fn close(&self) -> Result<()>;
}

// ── stdio ─────────────────────────────────────────────────────────────────

/// Transport over a spawned child process, one JSON message per line.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
}

impl StdioTransport {
    /// Spawn `command args…` with `env` merged into the child environment.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Tool(format!("Failed to spawn MCP server `{command}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Tool("MCP server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| Error::Tool("MCP server stdout not available".into()))?;

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(stdout),
        })
    }

    async fn write_frame(&self, request: &JsonRpcRequest) -> Result<()> {
        let frame = serde_json::to_string(request)?;
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| Error::Tool(format!("Failed to write to MCP server: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Tool(format!("Failed to write to MCP server: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Tool(format!("Failed to flush MCP server stdin: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let expected_id = request
            .id
            .ok_or_else(|| Error::Invalid("send() requires a request id".into()))?;
        self.write_frame(&request).await?;

        let mut stdout = self.stdout.lock().await;
        loop {
            let mut line = String::new();
            let read = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Tool(format!("Failed to read from MCP server: {e}")))?;
            if read == 0 {
                return Err(Error::Tool("MCP server closed its stdout".into()));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(line) {
                Ok(response) if response.id == expected_id => return Ok(response),
                Ok(response) => {
                    debug!(id = response.id, "Skipping out-of-order MCP response")
                }
                // Server-initiated notifications and log lines are skipped.
                Err(_) => debug!(line, "Skipping non-response MCP output"),
            }
        }
    }

    async fn notify(&self, request: JsonRpcRequest) -> Result<()> {
        self.write_frame(&request).await
    }

    async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        child
            .kill()
            .await
            .map_err(|e| Error::Tool(format!("Failed to kill MCP server: {e}")))
    }
}

// ── SSE ───────────────────────────────────────────────────────────────────

type PendingMap = std::sync::Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Transport over an HTTP Server-Sent-Events stream.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    pending: PendingMap,
    reader: tokio::task::JoinHandle<()>,
}

const ENDPOINT_WAIT: Duration = Duration::from_secs(10);
const RESPONSE_WAIT: Duration = Duration::from_secs(120);

impl SseTransport {
    /// Open the event stream at `<base_url><sse_path>` and wait for the
    /// server to announce its message endpoint.
    pub async fn connect(base_url: &str, sse_path: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::new();
        let stream_url = format!("{base}{sse_path}");

        let response = client
            .get(&stream_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::Tool(format!("Failed to open SSE stream: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Tool(format!(
                "SSE stream rejected: status={}",
                response.status()
            )));
        }

        let pending: PendingMap = Default::default();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader = tokio::spawn(Self::read_events(
            response,
            pending.clone(),
            endpoint_tx,
        ));

        let endpoint = tokio::time::timeout(ENDPOINT_WAIT, endpoint_rx)
            .await
            .map_err(|_| Error::Tool("Timed out waiting for SSE endpoint event".into()))?
            .map_err(|_| Error::Tool("SSE stream ended before the endpoint event".into()))?;

        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint
        } else if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            format!("{base}/{endpoint}")
        };
        debug!(endpoint, "SSE transport connected");

        Ok(Self {
            client,
            endpoint,
            pending,
            reader,
        })
    }

    /// Drain the event stream: `endpoint` names the POST target, `message`
    /// events carry JSON-RPC responses.
    async fn read_events(
        response: reqwest::Response,
        pending: PendingMap,
        endpoint_tx: oneshot::Sender<String>,
    ) {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut event_name = String::new();
        let mut event_data = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "SSE stream interrupted");
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim_end_matches('\r').to_string();
                buffer.drain(..=line_end);

                if line.is_empty() {
                    // Event boundary.
                    if !event_data.is_empty() {
                        Self::dispatch(&event_name, &event_data, &pending, &mut endpoint_tx);
                    }
                    event_name.clear();
                    event_data.clear();
                    continue;
                }
                if line.starts_with(':') {
                    continue;
                }
                if let Some(name) = line.strip_prefix("event:") {
                    event_name = name.trim().to_string();
                } else if let Some(data) = line.strip_prefix("data:") {
                    if !event_data.is_empty() {
                        event_data.push('\n');
                    }
                    event_data.push_str(data.trim());
                }
            }
        }
    }

    fn dispatch(
        event_name: &str,
        data: &str,
        pending: &PendingMap,
        endpoint_tx: &mut Option<oneshot::Sender<String>>,
    ) {
        match event_name {
            "endpoint" => {
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(data.to_string());
                }
            }
            // Servers label responses `message`; tolerate unlabeled data.
            "" | "message" => match serde_json::from_str::<JsonRpcResponse>(data) {
                Ok(response) => {
                    let sender = pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&response.id);
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!(id = response.id, "Unmatched MCP response"),
                    }
                }
                Err(_) => debug!(data, "Skipping non-response SSE data"),
            },
            other => debug!(event = other, "Ignoring SSE event"),
        }
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request
            .id
            .ok_or_else(|| Error::Invalid("send() requires a request id".into()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let posted = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await;
        if let Err(e) = posted {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(Error::Tool(format!("Failed to POST MCP request: {e}")));
        }

        match tokio::time::timeout(RESPONSE_WAIT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Tool("SSE stream closed before the response".into())),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                Err(Error::Tool("Timed out waiting for MCP response".into()))
            }
        }
    }

    async fn notify(&self, request: JsonRpcRequest) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tool(format!("Failed to POST MCP notification: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.reader.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let request = JsonRpcRequest::call(1, "tools/list", None);
        let frame = serde_json::to_string(&request).unwrap();
        assert!(frame.contains("\"jsonrpc\":\"2.0\""));
        assert!(frame.contains("\"method\":\"tools/list\""));
        assert!(frame.contains("\"id\":1"));
        assert!(!frame.contains("params"));
    }

    #[test]
    fn notification_has_no_id() {
        let request = JsonRpcRequest::notification("notifications/initialized", None);
        let frame = serde_json::to_string(&request).unwrap();
        assert!(!frame.contains("\"id\""));
    }

    #[test]
    fn response_deserialization() {
        let frame = r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#;
        let response: JsonRpcResponse = serde_json::from_str(frame).unwrap();
        assert_eq!(response.id, 7);
        assert!(response.result.is_some());
        assert!(response.error.is_none());

        let frame = r#"{"jsonrpc":"2.0","id":8,"error":{"code":-32601,"message":"no such method"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(frame).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert!(error.message.contains("no such method"));
    }
}
