//! Process-wide vector-store registry keyed by config name.
//!
//! Vector stores are shared across sessions; each store serializes its own
//! mutations internally, so handing out `Arc`s is safe.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mentis_core::{Error, Result};
use once_cell::sync::Lazy;
use tracing::info;

use crate::vector_store::VectorStore;

static STORES: Lazy<RwLock<HashMap<String, Arc<VectorStore>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Fetch (or lazily construct) the vector store for a named configuration.
pub fn vector_store(name: &str) -> Result<Arc<VectorStore>> {
    {
        let stores = STORES.read().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }
    }

    let config = mentis_config::global()
        .vector_store_config(name)
        .map_err(|e| Error::Config(e.to_string()))?
        .clone();

    let mut stores = STORES.write().unwrap_or_else(|e| e.into_inner());
    if let Some(store) = stores.get(name) {
        return Ok(store.clone());
    }
    let store = Arc::new(VectorStore::new(config)?);
    info!(name, "Constructed vector store");
    stores.insert(name.to_string(), store.clone());
    Ok(store)
}

/// Register a pre-built store under a name.
pub fn register_vector_store(name: impl Into<String>, store: Arc<VectorStore>) {
    let mut stores = STORES.write().unwrap_or_else(|e| e.into_inner());
    stores.insert(name.into(), store);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentis_config::VectorStoreConfig;

    #[test]
    fn registered_stores_are_shared() {
        let store = Arc::new(
            VectorStore::new(VectorStoreConfig {
                dim: 4,
                ..VectorStoreConfig::default()
            })
            .unwrap(),
        );
        register_vector_store("shared_test", store.clone());
        let fetched = vector_store("shared_test").unwrap();
        assert!(Arc::ptr_eq(&store, &fetched));
    }
}
