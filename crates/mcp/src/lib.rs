//! mentis-mcp: Model-Context-Protocol client support.
//!
//! Agents reach remote tools through MCP servers over stdio or SSE. The
//! tools discovered from a server satisfy the same `Tool` trait as local
//! ones; callers never see the transport.

pub mod client;
pub mod tool;
pub mod transport;

pub use client::{CallToolResult, McpClient, McpToolInfo};
pub use tool::{load_tools, McpTool};
pub use transport::{JsonRpcRequest, JsonRpcResponse, McpTransport, SseTransport, StdioTransport};
