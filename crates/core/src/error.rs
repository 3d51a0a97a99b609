//! Error types for the mentis domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Variants follow the
//! runtime's failure taxonomy rather than transport details: configuration
//! problems, upstream (LLM/embedding) failures, tool failures, invalid
//! input, missing entities, and fatal conditions.

use thiserror::Error;

/// The top-level error type for all mentis operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration file or entry.
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM or embedding endpoint failure after retries, or a malformed
    /// response.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A tool (local or MCP) failed in a way that could not be captured as a
    /// ToolResult.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Malformed arguments, unknown tool, dimension mismatch, invalid cursor
    /// or step index.
    #[error("Invalid: {0}")]
    Invalid(String),

    /// Unknown plan id, memory id, or session.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unrecoverable conditions: index corruption, failed initialization of
    /// required singletons.
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
