//! HNSW-backed approximate-nearest-neighbor store.
//!
//! The index is a usearch HNSW graph; metadata lives beside it in an LRU
//! cache (id → item plus a recency order) bounded by `max_elements`.
//! Mutations serialize through a writer lock; searches take the shared side.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use mentis_config::{Metric, VectorStoreConfig};
use mentis_core::{Error, Result};
use tracing::debug;
use usearch::{new_index, Index, IndexOptions, MetricKind, ScalarKind};

use crate::item::{MemoryFilter, MemoryItem};

/// Metadata cache with LRU recency. Front of `order` is most recent.
#[derive(Default)]
struct MetadataCache {
    map: HashMap<u64, MemoryItem>,
    order: VecDeque<u64>,
}

impl MetadataCache {
    fn touch(&mut self, id: u64) {
        if let Some(pos) = self.order.iter().position(|&x| x == id) {
            self.order.remove(pos);
            self.order.push_front(id);
        }
    }

    fn set(&mut self, id: u64, item: MemoryItem) {
        if self.map.insert(id, item).is_some() {
            self.touch(id);
        } else {
            self.order.push_front(id);
        }
    }

    fn remove(&mut self, id: u64) -> Option<MemoryItem> {
        if let Some(pos) = self.order.iter().position(|&x| x == id) {
            self.order.remove(pos);
        }
        self.map.remove(&id)
    }

    fn lru(&self) -> Option<u64> {
        self.order.back().copied()
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

struct Inner {
    index: Index,
    cache: MetadataCache,
}

/// An ANN store over fixed-dimension vectors with per-id metadata.
pub struct VectorStore {
    config: VectorStoreConfig,
    inner: RwLock<Inner>,
}

fn build_index(config: &VectorStoreConfig) -> Result<Index> {
    let options = IndexOptions {
        dimensions: config.dim,
        metric: match config.metric {
            Metric::L2 => MetricKind::L2sq,
            Metric::IP => MetricKind::IP,
        },
        quantization: ScalarKind::F32,
        connectivity: config.m,
        expansion_add: config.ef_construction,
        ..Default::default()
    };
    let index =
        new_index(&options).map_err(|e| Error::Fatal(format!("Failed to build index: {e}")))?;
    index
        .reserve(config.max_elements)
        .map_err(|e| Error::Fatal(format!("Failed to reserve index capacity: {e}")))?;
    Ok(index)
}

impl VectorStore {
    pub fn new(config: VectorStoreConfig) -> Result<Self> {
        let index = build_index(&config)?;
        Ok(Self {
            config,
            inner: RwLock::new(Inner {
                index,
                cache: MetadataCache::default(),
            }),
        })
    }

    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dim {
            return Err(Error::Invalid(format!(
                "dim mismatch: expected {}, got {}",
                self.config.dim,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Insert a vector with metadata. Evicts the least-recently-used entry
    /// first when the store is full.
    pub fn insert(&self, vector: &[f32], id: u64, mut metadata: MemoryItem) -> Result<()> {
        self.check_dim(vector)?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if inner.cache.len() >= self.config.max_elements {
            if let Some(lru_id) = inner.cache.lru() {
                debug!(id = lru_id, "Evicting least-recently-used memory");
                let _ = inner.index.remove(lru_id);
                inner.cache.remove(lru_id);
            }
        }

        inner
            .index
            .add(id, vector)
            .map_err(|e| Error::Fatal(format!("Index insert failed: {e}")))?;

        metadata.id = id;
        inner.cache.set(id, metadata);
        Ok(())
    }

    /// k-NN search, ascending distance, annotated into `score`. A filter is
    /// evaluated against live metadata; the index is over-fetched to
    /// compensate for filtered-out hits.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MemoryFilter>,
    ) -> Result<Vec<MemoryItem>> {
        self.check_dim(query)?;
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        let fetch = match filter {
            Some(_) => (limit.saturating_mul(4).max(limit + 8)).min(inner.cache.len().max(limit)),
            None => limit,
        };

        let matches = inner
            .index
            .search(query, fetch)
            .map_err(|e| Error::Fatal(format!("Index search failed: {e}")))?;

        let mut items = Vec::new();
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(item) = inner.cache.map.get(key) else {
                continue;
            };
            if let Some(filter) = filter {
                if !filter(item) {
                    continue;
                }
            }
            let mut item = item.clone();
            item.score = *distance;
            items.push(item);
            if items.len() >= limit {
                break;
            }
        }
        Ok(items)
    }

    /// Remove an id from index and metadata. Later searches must not return
    /// it.
    pub fn remove(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.cache.map.get(&id).is_none() {
            return Err(Error::NotFound(format!("memory id {id}")));
        }
        inner
            .index
            .remove(id)
            .map_err(|e| Error::Fatal(format!("Index remove failed: {e}")))?;
        inner.cache.remove(id);
        Ok(())
    }

    /// Re-point and/or re-describe an id. A metadata update keeps
    /// `created_at` when the content hash is unchanged and always refreshes
    /// `updated_at`.
    pub fn update(
        &self,
        id: u64,
        vector: Option<&[f32]>,
        metadata: Option<MemoryItem>,
    ) -> Result<()> {
        if let Some(vector) = vector {
            self.check_dim(vector)?;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(vector) = vector {
            let _ = inner.index.remove(id);
            inner
                .index
                .add(id, vector)
                .map_err(|e| Error::Fatal(format!("Index insert failed: {e}")))?;
        }

        if let Some(mut metadata) = metadata {
            metadata.id = id;
            let now = chrono::Utc::now().timestamp_micros();
            if let Some(existing) = inner.cache.map.get(&id) {
                if metadata.hash == existing.hash {
                    metadata.created_at = existing.created_at;
                } else {
                    metadata.created_at = now;
                }
            }
            metadata.updated_at = now;
            inner.cache.set(id, metadata);
        }
        Ok(())
    }

    /// Fetch metadata, touching LRU recency.
    pub fn get(&self, id: u64) -> Result<MemoryItem> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let item = inner
            .cache
            .map
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("memory id {id}")))?;
        inner.cache.touch(id);
        Ok(item)
    }

    /// Enumerate live entries, filter applied before limit. `limit` 0 means
    /// unlimited. No order guarantee.
    pub fn list(&self, limit: usize, filter: Option<&MemoryFilter>) -> Vec<MemoryItem> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut items = Vec::new();
        for item in inner.cache.map.values() {
            if let Some(filter) = filter {
                if !filter(item) {
                    continue;
                }
            }
            items.push(item.clone());
            if limit > 0 && items.len() >= limit {
                break;
            }
        }
        items
    }

    /// Drop everything and rebuild an empty index.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.index = build_index(&self.config)?;
        inner.cache = MetadataCache::default();
        Ok(())
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store(dim: usize, max_elements: usize) -> VectorStore {
        VectorStore::new(VectorStoreConfig {
            dim,
            max_elements,
            ..VectorStoreConfig::default()
        })
        .unwrap()
    }

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn insert_search_roundtrip() {
        let store = store(4, 100);
        store.insert(&unit(4, 0), 1, MemoryItem::new(1, "alpha")).unwrap();
        store.insert(&unit(4, 1), 2, MemoryItem::new(2, "beta")).unwrap();

        let hits = store.search(&unit(4, 0), 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[0].memory, "alpha");
        // Distances are non-negative and non-decreasing.
        assert!(hits[0].score >= 0.0);
        assert!(hits[0].score <= hits[1].score);
    }

    #[test]
    fn dim_mismatch_is_invalid() {
        let store = store(4, 100);
        let result = store.insert(&[1.0, 2.0], 1, MemoryItem::new(1, "x"));
        assert!(matches!(result, Err(Error::Invalid(_))));
        assert!(matches!(
            store.search(&[1.0], 1, None),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn removed_ids_stop_appearing() {
        let store = store(4, 100);
        store.insert(&unit(4, 0), 1, MemoryItem::new(1, "gone")).unwrap();
        store.remove(1).unwrap();

        let hits = store.search(&unit(4, 0), 5, None).unwrap();
        assert!(hits.iter().all(|h| h.id != 1));
        assert!(matches!(store.get(1), Err(Error::NotFound(_))));
        assert!(matches!(store.remove(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn update_preserves_created_at_for_same_hash() {
        let store = store(4, 100);
        let item = MemoryItem::new(7, "stable");
        let created = item.created_at;
        store.insert(&unit(4, 0), 7, item).unwrap();

        // Same content: created_at survives.
        store
            .update(7, None, Some(MemoryItem::new(7, "stable")))
            .unwrap();
        let fetched = store.get(7).unwrap();
        assert_eq!(fetched.created_at, created);

        // Different content: created_at refreshes.
        store
            .update(7, None, Some(MemoryItem::new(7, "changed")))
            .unwrap();
        let fetched = store.get(7).unwrap();
        assert!(fetched.created_at >= created);
        assert_eq!(fetched.memory, "changed");
    }

    #[test]
    fn update_vector_repositions_the_point() {
        let store = store(4, 100);
        store.insert(&unit(4, 0), 1, MemoryItem::new(1, "mover")).unwrap();
        store.insert(&unit(4, 1), 2, MemoryItem::new(2, "anchor")).unwrap();

        store.update(1, Some(&unit(4, 2)), None).unwrap();

        let hits = store.search(&unit(4, 2), 1, None).unwrap();
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn full_store_evicts_lru() {
        let store = store(4, 2);
        store.insert(&unit(4, 0), 1, MemoryItem::new(1, "one")).unwrap();
        store.insert(&unit(4, 1), 2, MemoryItem::new(2, "two")).unwrap();

        // Touch 1 so that 2 becomes least recently used.
        store.get(1).unwrap();

        store.insert(&unit(4, 2), 3, MemoryItem::new(3, "three")).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(2).is_err());
        assert!(store.get(1).is_ok());
        assert!(store.get(3).is_ok());
    }

    #[test]
    fn search_filter_excludes_items() {
        let store = store(4, 100);
        store.insert(&unit(4, 0), 1, MemoryItem::new(1, "keep")).unwrap();
        store.insert(&unit(4, 0), 2, MemoryItem::new(2, "drop")).unwrap();

        let filter: MemoryFilter = Arc::new(|item: &MemoryItem| item.memory == "keep");
        let hits = store.search(&unit(4, 0), 5, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn list_applies_filter_then_limit() {
        let store = store(4, 100);
        for i in 0..5u64 {
            store
                .insert(&unit(4, (i % 4) as usize), i, MemoryItem::new(i, format!("m{i}")))
                .unwrap();
        }
        assert_eq!(store.list(0, None).len(), 5);
        assert_eq!(store.list(3, None).len(), 3);

        let filter: MemoryFilter = Arc::new(|item: &MemoryItem| item.id % 2 == 0);
        let even = store.list(0, Some(&filter));
        assert_eq!(even.len(), 3);
    }

    #[test]
    fn reset_empties_the_store() {
        let store = store(4, 100);
        store.insert(&unit(4, 0), 1, MemoryItem::new(1, "x")).unwrap();
        store.reset().unwrap();
        assert!(store.is_empty());
        assert!(store.search(&unit(4, 0), 5, None).unwrap().is_empty());
    }
}
