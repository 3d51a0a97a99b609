//! mentis-flow: multi-agent execution flows.
//!
//! The planning flow asks an LLM for a stepped plan and drives agents
//! through the steps, summarizing progress between them.

pub mod planning;

pub use planning::PlanningFlow;
