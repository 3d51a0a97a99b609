//! mentis-core: domain types shared across the agent runtime.
//!
//! This crate holds the message/tool-call schema, the token-counting
//! contract, the Tool trait with its collection, the provider traits the
//! runtime consumes, the agent state machine, the error taxonomy, and the
//! session-scoped log capture. It has no I/O of its own.

pub mod error;
pub mod message;
pub mod provider;
pub mod session;
pub mod state;
pub mod token;
pub mod tool;

pub use error::{Error, Result};
pub use message::{content_to_text, ContentPart, ImageUrl, Message, MessageContent, Role, ToolCall};
pub use provider::{ChatClient, ChatResponse, Embedder, EmbeddingKind, TokenUsage, ToolChoice};
pub use state::AgentState;
pub use tool::{Tool, ToolCollection, ToolResult};
