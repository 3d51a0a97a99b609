//! Process-wide client registries keyed by config name.
//!
//! Chat and embedding clients are shared singletons: many sessions may refer
//! to the same named configuration, and the underlying HTTP transports are
//! safe for concurrent use. Lookup takes the shared side of a reader-writer
//! lock; construction on first request takes the exclusive side.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mentis_core::{Error, Result};
use once_cell::sync::Lazy;
use tracing::info;

use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;

static LLMS: Lazy<RwLock<HashMap<String, Arc<LlmClient>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static EMBEDDERS: Lazy<RwLock<HashMap<String, Arc<EmbeddingClient>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Fetch (or lazily construct) the chat client for a named configuration.
pub fn llm(name: &str) -> Result<Arc<LlmClient>> {
    {
        let clients = LLMS.read().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(name) {
            return Ok(client.clone());
        }
    }

    let config = mentis_config::global()
        .llm_config(name)
        .map_err(|e| Error::Config(e.to_string()))?
        .clone();

    let mut clients = LLMS.write().unwrap_or_else(|e| e.into_inner());
    if let Some(client) = clients.get(name) {
        return Ok(client.clone());
    }
    let client = Arc::new(LlmClient::new(name, config)?);
    info!(name, "Constructed LLM client");
    clients.insert(name.to_string(), client.clone());
    Ok(client)
}

/// Fetch (or lazily construct) the embedding client for a named
/// configuration.
pub fn embedder(name: &str) -> Result<Arc<EmbeddingClient>> {
    {
        let clients = EMBEDDERS.read().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(name) {
            return Ok(client.clone());
        }
    }

    let config = mentis_config::global()
        .embedding_config(name)
        .map_err(|e| Error::Config(e.to_string()))?
        .clone();

    let mut clients = EMBEDDERS.write().unwrap_or_else(|e| e.into_inner());
    if let Some(client) = clients.get(name) {
        return Ok(client.clone());
    }
    let client = Arc::new(EmbeddingClient::new(name, config)?);
    info!(name, "Constructed embedding client");
    clients.insert(name.to_string(), client.clone());
    Ok(client)
}

/// Register a pre-built chat client under a name (tests and embedders of
/// the library that construct clients themselves).
pub fn register_llm(name: impl Into<String>, client: Arc<LlmClient>) {
    let mut clients = LLMS.write().unwrap_or_else(|e| e.into_inner());
    clients.insert(name.into(), client);
}

/// Register a pre-built embedding client under a name.
pub fn register_embedder(name: impl Into<String>, client: Arc<EmbeddingClient>) {
    let mut clients = EMBEDDERS.write().unwrap_or_else(|e| e.into_inner());
    clients.insert(name.into(), client);
}
