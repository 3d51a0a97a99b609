//! LLM-driven fact extraction and long-term store maintenance.
//!
//! An evicted batch of messages is serialized into a transcript, distilled
//! into facts by a forced `fact_extract` call, and reconciled against the
//! nearest existing memories by a forced `memory` call that emits
//! ADD/UPDATE/DELETE/NONE events. Candidate memories are renumbered 0..K-1
//! before the reconciliation call so hallucinated ids cannot touch
//! arbitrary entries; events translate back through the temp map, falling
//! back to a fresh id (ADD semantics) when the lookup fails.

use std::collections::HashMap;
use std::sync::Arc;

use mentis_core::message::{Message, ToolCall};
use mentis_core::provider::{ChatClient, Embedder, EmbeddingKind, ToolChoice};
use mentis_core::Result;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::item::MemoryItem;
use crate::prompts;
use crate::vector_store::VectorStore;

/// Schema of the forced fact-extraction tool.
pub(crate) fn fact_extract_param() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "fact_extract",
            "description": "Extract facts and store them in a long-term memory.",
            "parameters": {
                "type": "object",
                "properties": {
                    "facts": {
                        "description": "List of facts to extract and store.",
                        "type": "array",
                        "items": {"type": "string"}
                    }
                },
                "required": ["facts"],
                "additionalProperties": false
            }
        }
    })
}

/// Schema of the forced memory-update tool.
pub(crate) fn memory_tool_param() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "memory",
            "description": "Manage and retrieve memory.",
            "parameters": {
                "type": "object",
                "properties": {
                    "events": {
                        "description": "Array of memory events. Each event is an object with 'id', 'text', 'type', and 'old_memory' (optional) fields.",
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {
                                    "description": "Unique identifier for the memory item.",
                                    "type": "string"
                                },
                                "text": {
                                    "description": "Text of the memory item.",
                                    "type": "string"
                                },
                                "type": {
                                    "description": "Type of event: 'ADD', 'UPDATE', 'DELETE', or 'NONE'.",
                                    "type": "string",
                                    "enum": ["ADD", "UPDATE", "DELETE", "NONE"]
                                },
                                "old_memory": {
                                    "description": "Old memory item. Required for update events.",
                                    "type": "string"
                                }
                            }
                        }
                    }
                },
                "required": ["events"]
            }
        }
    })
}

/// A fresh 64-bit memory id.
fn fresh_memory_id() -> u64 {
    u64::from_be_bytes(Uuid::new_v4().as_bytes()[..8].try_into().unwrap_or([0; 8]))
}

/// Render an evicted batch as a role-prefixed transcript, tool calls fenced.
fn serialize_batch(batch: &[Message]) -> String {
    let mut transcript = String::new();
    for message in batch {
        transcript.push_str(&format!("{}: {}\n", message.role, message.text()));
        for call in &message.tool_calls {
            transcript.push_str(&format!("<tool_call>{}</tool_call>\n", call.to_value()));
        }
    }
    transcript
}

/// Parse a tool call's arguments, which may arrive as a JSON string.
fn parsed_arguments(call: &ToolCall) -> Option<Value> {
    match &call.function.arguments {
        Value::String(raw) => serde_json::from_str(raw).ok(),
        other => Some(other.clone()),
    }
}

/// Coerce an event id that may be a number or a numeric string.
fn coerce_temp_id(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Drives the extraction/update flow against one vector store.
pub struct FactPipeline {
    llm: Arc<dyn ChatClient>,
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    /// `{current_date}` already substituted.
    fact_extraction_prompt: String,
    update_memory_prompt: String,
}

impl FactPipeline {
    pub fn new(
        llm: Arc<dyn ChatClient>,
        embedder: Arc<dyn Embedder>,
        store: Arc<VectorStore>,
        fact_extraction_prompt: String,
        update_memory_prompt: String,
    ) -> Self {
        Self {
            llm,
            embedder,
            store,
            fact_extraction_prompt,
            update_memory_prompt,
        }
    }

    /// Distill a batch into facts and apply the resulting memory events.
    pub async fn process(&self, batch: &[Message], current_request: &str) -> Result<()> {
        let facts = self.extract_facts(batch, current_request).await?;
        if facts.is_empty() {
            return Ok(());
        }
        info!(count = facts.len(), "New facts to remember");

        // Embed every fact once and collect its nearest existing memories.
        let mut fact_embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        let mut candidates: Vec<(u64, String)> = Vec::new();
        for fact in &facts {
            let embedding = self.embedder.embed(fact, EmbeddingKind::Add).await?;
            for neighbor in self.store.search(&embedding, 5, None)? {
                candidates.push((neighbor.id, neighbor.memory));
            }
            fact_embeddings.insert(fact.clone(), embedding);
        }
        candidates.sort_by_key(|(id, _)| *id);
        candidates.dedup_by_key(|(id, _)| *id);
        debug!(count = candidates.len(), "Existing memories about new facts");

        // Renumber candidates 0..K-1 so hallucinated ids miss the temp map.
        let temp_ids: Vec<u64> = candidates.iter().map(|(id, _)| *id).collect();
        let old_memories = Value::Array(
            candidates
                .iter()
                .enumerate()
                .map(|(idx, (_, text))| json!({"id": idx, "text": text}))
                .collect(),
        );

        let events = self.decide_events(&old_memories, &facts).await?;
        for event in events {
            self.apply_event(&event, &temp_ids, &fact_embeddings).await;
        }
        Ok(())
    }

    async fn extract_facts(&self, batch: &[Message], current_request: &str) -> Result<Vec<String>> {
        let system = self
            .fact_extraction_prompt
            .replace("{current_request}", current_request);
        let transcript = serialize_batch(batch);
        let input = Message::user(format!("<input>{transcript}</input>"));

        let response = self
            .llm
            .ask_tool(
                &[input],
                &system,
                "",
                &[fact_extract_param()],
                ToolChoice::Required,
            )
            .await?;

        let mut facts = Vec::new();
        for call in &response.tool_calls {
            // The model may hallucinate other tool names; only honor ours.
            if call.function.name != "fact_extract" {
                continue;
            }
            let Some(args) = parsed_arguments(call) else {
                warn!("Unparseable fact_extract arguments");
                continue;
            };
            if let Some(items) = args["facts"].as_array() {
                facts.extend(
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .filter(|s| !s.is_empty()),
                );
            }
        }
        Ok(facts)
    }

    async fn decide_events(&self, old_memories: &Value, facts: &[String]) -> Result<Vec<Value>> {
        let prompt = prompts::build_update_memory_prompt(
            old_memories,
            &json!(facts),
            &self.update_memory_prompt,
        );
        let response = self
            .llm
            .ask_tool(
                &[Message::user(prompt)],
                "",
                "",
                &[memory_tool_param()],
                ToolChoice::Required,
            )
            .await?;

        let mut events = Vec::new();
        for call in &response.tool_calls {
            if call.function.name != "memory" {
                continue;
            }
            let Some(args) = parsed_arguments(call) else {
                warn!("Unparseable memory arguments");
                continue;
            };
            if let Some(items) = args["events"].as_array() {
                events.extend(items.iter().cloned());
            }
        }
        Ok(events)
    }

    async fn apply_event(
        &self,
        event: &Value,
        temp_ids: &[u64],
        fact_embeddings: &HashMap<String, Vec<f32>>,
    ) {
        debug!(event = %event, "Processing memory event");
        let Some(text) = event["text"].as_str() else {
            warn!("Skipping memory event with empty `text` field");
            return;
        };
        let kind = event["type"].as_str().unwrap_or("NONE");

        // Translate the temp id back to a real one; a failed lookup falls
        // back to a fresh id (ADD semantics).
        let memory_id = if kind != "ADD" {
            coerce_temp_id(&event["id"])
                .and_then(|idx| temp_ids.get(idx).copied())
                .unwrap_or_else(fresh_memory_id)
        } else {
            fresh_memory_id()
        };

        match kind {
            "ADD" => self.create_memory(memory_id, text, fact_embeddings).await,
            "UPDATE" => self.update_memory(memory_id, text, fact_embeddings).await,
            "DELETE" => self.delete_memory(memory_id),
            _ => {}
        }
    }

    async fn embedding_for(
        &self,
        text: &str,
        fact_embeddings: &HashMap<String, Vec<f32>>,
    ) -> Result<Vec<f32>> {
        if let Some(embedding) = fact_embeddings.get(text) {
            return Ok(embedding.clone());
        }
        self.embedder.embed(text, EmbeddingKind::Add).await
    }

    async fn create_memory(
        &self,
        memory_id: u64,
        text: &str,
        fact_embeddings: &HashMap<String, Vec<f32>>,
    ) {
        info!(id = memory_id, "Creating memory: {text}");
        let embedding = match self.embedding_for(text, fact_embeddings).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(error = %e, "Failed to embed new memory");
                return;
            }
        };
        if let Err(e) = self
            .store
            .insert(&embedding, memory_id, MemoryItem::new(memory_id, text))
        {
            error!(error = %e, "Failed to insert memory");
        }
    }

    async fn update_memory(
        &self,
        memory_id: u64,
        text: &str,
        fact_embeddings: &HashMap<String, Vec<f32>>,
    ) {
        let mut existing = match self.store.get(memory_id) {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, "Error fetching existing memory");
                return;
            }
        };
        info!(id = memory_id, "Updating memory: (old) {} (new) {text}", existing.memory);

        let embedding = match self.embedding_for(text, fact_embeddings).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(error = %e, "Failed to embed updated memory");
                return;
            }
        };
        existing.update(text);
        if let Err(e) = self.store.update(memory_id, Some(&embedding), Some(existing)) {
            error!(error = %e, "Failed to update memory");
        }
    }

    fn delete_memory(&self, memory_id: u64) {
        info!(id = memory_id, "Deleting memory");
        if let Err(e) = self.store.remove(memory_id) {
            error!(error = %e, "Failed to delete memory");
        }
    }
}
