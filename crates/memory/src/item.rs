//! Long-term memory items.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// One distilled fact stored in the vector store.
///
/// `hash` is the SHA-256 digest of `memory` and changes iff the text
/// changes; the store uses it to keep `created_at` stable across no-op
/// updates. `score` is the search distance of the most recent lookup and is
/// ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: u64,
    pub memory: String,
    pub hash: String,
    /// Microseconds since the epoch.
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub score: f32,
}

impl MemoryItem {
    pub fn new(id: u64, memory: impl Into<String>) -> Self {
        let memory = memory.into();
        let hash = digest(&memory);
        let now = Utc::now().timestamp_micros();
        Self {
            id,
            memory,
            hash,
            created_at: now,
            updated_at: now,
            score: -1.0,
        }
    }

    /// Replace the text, refreshing hash and update time.
    pub fn update(&mut self, memory: impl Into<String>) {
        self.memory = memory.into();
        self.hash = digest(&self.memory);
        self.updated_at = Utc::now().timestamp_micros();
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }
}

fn digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Predicate applied to live metadata during search and list.
pub type MemoryFilter = Arc<dyn Fn(&MemoryItem) -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_changes_iff_memory_changes() {
        let mut item = MemoryItem::new(1, "likes rust");
        let original_hash = item.hash.clone();

        item.update("likes rust");
        assert_eq!(item.hash, original_hash);

        item.update("likes go");
        assert_ne!(item.hash, original_hash);
    }

    #[test]
    fn update_refreshes_updated_at_only() {
        let mut item = MemoryItem::new(1, "a");
        let created = item.created_at;
        item.update("b");
        assert_eq!(item.created_at, created);
        assert!(item.updated_at >= created);
    }
}
