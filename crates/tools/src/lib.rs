//! mentis-tools: the built-in tools that participate in core invariants.
//!
//! `content_provider` backs the oversized-result spill path, `terminate`
//! ends agent runs, and `planning` is the plan table driven by the planning
//! flow.

pub mod content_provider;
pub mod planning;
pub mod terminate;

use std::sync::Arc;

use mentis_core::ToolCollection;

pub use content_provider::ContentProvider;
pub use planning::{Plan, Planning, StepStatus};
pub use terminate::Terminate;

/// The default tool set every tool-call agent starts from.
pub fn default_collection() -> ToolCollection {
    ToolCollection::new(vec![
        Arc::new(ContentProvider::new()),
        Arc::new(Terminate::new()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_collection_contains_the_core_tools() {
        let collection = default_collection();
        assert!(collection.contains("content_provider"));
        assert!(collection.contains("terminate"));
    }
}
