//! mentis-agent: the tool-call agent.
//!
//! Drives an LLM through a think/act loop: think asks for the next
//! tool-call batch, act dispatches the calls through the tool collection
//! and records observations into memory. The loop watches for stuck
//! repetition and for the terminate tool.

pub mod prompts;
pub mod stuck;
pub mod testing;
pub mod toolcall;

pub use toolcall::ToolCallAgent;
