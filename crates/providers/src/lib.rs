//! mentis-providers: clients for the upstream endpoints the runtime
//! consumes: chat completions (with native or emulated tool calling) and
//! embeddings, plus the process-wide name-keyed registries that share them
//! across sessions.

pub mod embedding;
pub mod llm;
pub mod registry;
pub mod tool_parser;

pub use embedding::EmbeddingClient;
pub use llm::LlmClient;
pub use tool_parser::ToolParser;
