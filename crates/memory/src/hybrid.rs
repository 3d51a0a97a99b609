//! Hybrid short/long-term memory.
//!
//! The short-term side is a FIFO message window with message-count and
//! token budgets. Overflow evicts from the front into a batch that is
//! distilled into long-term facts (vector store + embeddings) by the fact
//! pipeline. Retrieval prepends the most relevant long-term items to the
//! window as `<memory>` user messages, within a context token budget.
//!
//! Long-term memory is best-effort: if the warmup probe or the pipeline
//! fails, the memory degrades to plain FIFO for the rest of the session
//! instead of aborting.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use mentis_config::MemoryConfig;
use mentis_core::message::{ContentPart, ImageUrl, Message, MessageContent, Role};
use mentis_core::provider::{ChatClient, Embedder, EmbeddingKind};
use mentis_core::Result;
use tracing::{info, warn};

use crate::fact::FactPipeline;
use crate::item::MemoryItem;
use crate::prompts;
use crate::vector_store::VectorStore;

/// Message window with vector-backed recall.
pub struct Memory {
    config: MemoryConfig,
    messages: VecDeque<Message>,
    /// The request currently being served; referenced by the synthesized
    /// head message and the fact-extraction prompt.
    pub current_request: String,
    num_tokens: usize,

    retrieval_enabled: bool,
    llm_vision: Option<Arc<dyn ChatClient>>,
    embedder: Option<Arc<dyn Embedder>>,
    vector_store: Option<Arc<VectorStore>>,
    pipeline: Option<FactPipeline>,
}

impl Memory {
    /// A FIFO-only memory without long-term recall.
    pub fn fifo(config: MemoryConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            current_request: String::new(),
            num_tokens: 0,
            retrieval_enabled: false,
            llm_vision: None,
            embedder: None,
            vector_store: None,
            pipeline: None,
        }
    }

    /// Build a hybrid memory from the named configs in the process
    /// registries. Falls back to FIFO when any component cannot be
    /// constructed.
    pub async fn new(config: MemoryConfig) -> Self {
        let llm = mentis_providers::registry::llm(&config.llm)
            .map(|c| c as Arc<dyn ChatClient>);
        let embedder = mentis_providers::registry::embedder(&config.embedding_model)
            .map(|c| c as Arc<dyn Embedder>);
        let store = crate::registry::vector_store(&config.vector_store);
        let llm_vision = mentis_providers::registry::llm(&config.llm_vision)
            .ok()
            .map(|c| c as Arc<dyn ChatClient>);

        match (llm, embedder, store) {
            (Ok(llm), Ok(embedder), Ok(store)) => {
                Self::with_components(config, llm, llm_vision, embedder, store).await
            }
            (llm, embedder, store) => {
                let reason = [
                    llm.err().map(|e| e.to_string()),
                    embedder.err().map(|e| e.to_string()),
                    store.err().map(|e| e.to_string()),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ");
                warn!(
                    "Error in initializing memory: {reason}, fallback to default FIFO memory"
                );
                Self::fifo(config)
            }
        }
    }

    /// Build a hybrid memory from explicit components, running the warmup
    /// probe. Any warmup failure disables long-term memory for the session.
    pub async fn with_components(
        config: MemoryConfig,
        llm: Arc<dyn ChatClient>,
        llm_vision: Option<Arc<dyn ChatClient>>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<VectorStore>,
    ) -> Self {
        let mut memory = Self::fifo(config);

        info!("Memory is warming up...");
        match Self::warmup(&llm, &embedder, &vector_store).await {
            Ok(()) => {
                info!("Memory is ready");
                let fact_prompt = memory
                    .config
                    .fact_extraction_prompt
                    .clone()
                    .unwrap_or_else(|| prompts::FACT_EXTRACTION_PROMPT.to_string())
                    .replace("{current_date}", &Utc::now().format("%Y-%m-%d").to_string());
                let update_prompt = memory
                    .config
                    .update_memory_prompt
                    .clone()
                    .unwrap_or_else(|| prompts::UPDATE_MEMORY_PROMPT.to_string());

                memory.pipeline = Some(FactPipeline::new(
                    llm,
                    embedder.clone(),
                    vector_store.clone(),
                    fact_prompt,
                    update_prompt,
                ));
                memory.embedder = Some(embedder);
                memory.vector_store = Some(vector_store);
                // Only keep a vision model that can actually see.
                memory.llm_vision = llm_vision.filter(|l| l.enable_vision());
                memory.retrieval_enabled = true;
            }
            Err(e) => {
                warn!(
                    "Error in initializing memory: {e}, fallback to default FIFO memory"
                );
            }
        }
        memory
    }

    async fn warmup(
        llm: &Arc<dyn ChatClient>,
        embedder: &Arc<dyn Embedder>,
        store: &Arc<VectorStore>,
    ) -> Result<()> {
        let reply = llm.ask(&[Message::user("Hello")], "", "").await?;
        let embedding = embedder.embed(&reply, EmbeddingKind::Add).await?;
        store.insert(&embedding, 0, MemoryItem::new(0, "warmup probe"))?;
        store.remove(0)?;
        Ok(())
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn messages(&self) -> &VecDeque<Message> {
        &self.messages
    }

    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    pub fn retrieval_enabled(&self) -> bool {
        self.retrieval_enabled
    }

    fn synthesized_head(&self) -> Message {
        Message::user(format!(
            "Current request: {}\n\nDue to limited memory, some previous messages are not shown.",
            self.current_request
        ))
    }

    fn over_limits(&self) -> bool {
        self.messages.len() > self.config.max_messages
            || self.num_tokens > self.config.max_tokens_messages
    }

    /// Append a message, maintaining the window invariants: at most
    /// `max_messages` messages and `max_tokens_messages` tokens, head role
    /// user or system. Returns false when the message alone exceeds the
    /// single-message token budget. Evicted messages flow into the fact
    /// pipeline when long-term memory is enabled.
    pub async fn add_message(&mut self, message: Message) -> bool {
        if message.num_tokens > self.config.max_tokens_message {
            warn!(tokens = message.num_tokens, "Message is too long, skipping");
            return false;
        }

        self.num_tokens += message.num_tokens;
        self.messages.push_back(message);

        let mut evicted: Vec<Message> = Vec::new();
        while self.over_limits() {
            if let Some(front) = self.messages.pop_front() {
                self.num_tokens -= front.num_tokens;
                evicted.push(front);
            } else {
                break;
            }
        }

        // Re-establish the head invariant: the window must open with a user
        // or system message. Orphaned tool messages are evicted; an
        // assistant head gets a synthesized user message in front (the
        // assistant message itself is evicted too unless it is the only
        // message left).
        let mut synthesize = false;
        loop {
            let Some(front) = self.messages.front() else {
                break;
            };
            match front.role {
                Role::User | Role::System => break,
                Role::Assistant => {
                    synthesize = true;
                    if self.messages.len() == 1 {
                        break;
                    }
                }
                Role::Tool => {}
            }
            if let Some(front) = self.messages.pop_front() {
                self.num_tokens -= front.num_tokens;
                evicted.push(front);
            }
        }
        if synthesize {
            let head = self.synthesized_head();
            self.num_tokens += head.num_tokens;
            self.messages.push_front(head);
            // The synthesized head may push past a limit; resume eviction
            // behind it.
            while self.over_limits() && self.messages.len() > 1 {
                if let Some(second) = self.messages.remove(1) {
                    self.num_tokens -= second.num_tokens;
                    evicted.push(second);
                }
            }
        }

        if self.retrieval_enabled && !evicted.is_empty() {
            self.flush_to_long_term(evicted).await;
        }
        true
    }

    pub async fn add_messages(&mut self, messages: Vec<Message>) -> bool {
        for message in messages {
            if !self.add_message(message).await {
                return false;
            }
        }
        true
    }

    /// The context to send to the LLM: retrieved long-term memories (when
    /// enabled and a query is given) followed by the live window.
    ///
    /// Retrieved items are sorted by `updated_at` descending and admitted
    /// newest-first while they fit under `max_tokens_context`; admitted
    /// items are emitted oldest-first ahead of the window.
    pub async fn get_messages(&self, query: &str) -> Vec<Message> {
        let mut out: Vec<Message> = Vec::new();

        if self.retrieval_enabled && !query.is_empty() {
            if let (Some(embedder), Some(store)) = (&self.embedder, &self.vector_store) {
                match embedder.embed(query, EmbeddingKind::Search).await {
                    Ok(embedding) => {
                        match store.search(&embedding, self.config.retrieval_limit, None) {
                            Ok(mut memories) => {
                                memories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

                                let mut budget = self.num_tokens;
                                let mut selected: VecDeque<Message> = VecDeque::new();
                                for item in &memories {
                                    let message = Message::user(format!(
                                        "<memory>{}</memory>",
                                        item.memory
                                    ));
                                    if budget + message.num_tokens
                                        > self.config.max_tokens_context
                                    {
                                        break;
                                    }
                                    budget += message.num_tokens;
                                    selected.push_front(message);
                                }
                                info!(count = selected.len(), "Total retrieved memories");
                                out.extend(selected);
                            }
                            Err(e) => warn!(error = %e, "Long-term memory search failed"),
                        }
                    }
                    Err(e) => warn!(error = %e, "Query embedding failed"),
                }
            }
        }

        out.extend(self.messages.iter().cloned());
        out
    }

    /// Discard the window. When long-term memory is enabled the whole
    /// window is flushed through the fact pipeline first.
    pub async fn clear(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        let drained: Vec<Message> = self.messages.drain(..).collect();
        self.num_tokens = 0;
        if self.retrieval_enabled {
            self.flush_to_long_term(drained).await;
        }
    }

    async fn flush_to_long_term(&mut self, mut batch: Vec<Message>) {
        self.normalize_vision(&mut batch).await;
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        if let Err(e) = pipeline.process(&batch, &self.current_request).await {
            warn!(
                error = %e,
                "Fact pipeline failed, disabling long-term memory for this session"
            );
            self.retrieval_enabled = false;
        }
    }

    /// Rewrite image parts into text, once per batch: descriptions from the
    /// vision model when one is configured, `[imageN]` placeholders
    /// otherwise.
    async fn normalize_vision(&self, batch: &mut [Message]) {
        for message in batch.iter_mut() {
            if !message.content.has_images() {
                continue;
            }
            match &self.llm_vision {
                Some(vision) => {
                    let MessageContent::Parts(parts) = &message.content else {
                        continue;
                    };
                    let mut rewritten = Vec::with_capacity(parts.len());
                    for part in parts {
                        match part {
                            ContentPart::Text { .. } => rewritten.push(part.clone()),
                            ContentPart::ImageUrl { image_url } => {
                                let description = describe_image(
                                    vision,
                                    &image_url.url,
                                    vision.vision_details(),
                                )
                                .await;
                                rewritten.push(ContentPart::text(description));
                            }
                        }
                    }
                    message.content = MessageContent::Parts(rewritten);
                }
                None => {
                    message.content = MessageContent::Text(message.content.as_text());
                }
            }
        }
    }
}

/// Ask the vision model for a high-level description of one image.
async fn describe_image(vision: &Arc<dyn ChatClient>, url: &str, detail: &str) -> String {
    let content = MessageContent::Parts(vec![
        ContentPart::text(
            "A user is providing an image. Provide a high level description of the image \
             and do not include any additional text.",
        ),
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.to_string(),
                detail: Some(detail.to_string()),
            },
        },
    ]);
    match vision.ask(&[Message::user(content)], "", "").await {
        Ok(description) => description,
        Err(e) => {
            warn!(error = %e, "Image description failed");
            "Here is an image that could not be described.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mentis_config::VectorStoreConfig;
    use mentis_core::provider::{ChatResponse, ToolChoice};
    use mentis_core::ToolCall;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn window_config(max_messages: usize) -> MemoryConfig {
        MemoryConfig {
            max_messages,
            ..MemoryConfig::default()
        }
    }

    fn roles(memory: &Memory) -> Vec<Role> {
        memory.messages().iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn window_never_exceeds_max_messages() {
        let mut memory = Memory::fifo(window_config(3));
        for i in 0..10 {
            memory.add_message(Message::user(format!("u{i}"))).await;
        }
        assert!(memory.messages().len() <= 3);
        assert_eq!(memory.messages().front().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn overflow_synthesizes_user_head() {
        let mut memory = Memory::fifo(window_config(3));
        memory.current_request = "do the thing".into();

        memory.add_message(Message::user("u1")).await;
        memory.add_message(Message::assistant("a1")).await;
        memory.add_message(Message::user("u2")).await;
        memory.add_message(Message::assistant("a2")).await;

        // u1 and a1 evicted; synthesized head fronts the survivors.
        assert_eq!(roles(&memory), vec![Role::User, Role::User, Role::Assistant]);
        let head = memory.messages().front().unwrap().text();
        assert!(head.starts_with("Current request: do the thing"));
        assert!(head.contains("some previous messages are not shown"));
        assert_eq!(memory.messages()[1].text(), "u2");
        assert_eq!(memory.messages()[2].text(), "a2");
    }

    #[tokio::test]
    async fn lone_assistant_head_is_kept_behind_synth() {
        let mut memory = Memory::fifo(window_config(16));
        memory.current_request = "req".into();
        memory.add_message(Message::assistant("summary")).await;

        assert_eq!(roles(&memory), vec![Role::User, Role::Assistant]);
        assert_eq!(memory.messages()[1].text(), "summary");
    }

    #[tokio::test]
    async fn orphan_tool_heads_are_evicted() {
        let mut memory = Memory::fifo(window_config(2));
        memory.add_message(Message::user("u1")).await;
        memory.add_message(Message::tool("t1", "call_1", "calc")).await;
        memory.add_message(Message::user("u2")).await;

        // u1 evicted by the cap, the now-orphaned tool message follows it.
        assert_eq!(roles(&memory), vec![Role::User]);
        assert_eq!(memory.messages()[0].text(), "u2");
    }

    #[tokio::test]
    async fn token_budget_evicts() {
        let config = MemoryConfig {
            max_messages: 100,
            max_tokens_messages: 30,
            ..MemoryConfig::default()
        };
        let mut memory = Memory::fifo(config);
        for i in 0..5 {
            // ~13 tokens each (36 chars / 4 + overhead)
            memory
                .add_message(Message::user(format!("{}{i}", "x".repeat(35))))
                .await;
        }
        assert!(memory.num_tokens() <= 30);
        assert!(memory.messages().len() < 5);
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let config = MemoryConfig {
            max_tokens_message: 10,
            ..MemoryConfig::default()
        };
        let mut memory = Memory::fifo(config);
        let accepted = memory
            .add_message(Message::user("x".repeat(200)))
            .await;
        assert!(!accepted);
        assert!(memory.messages().is_empty());
    }

    #[tokio::test]
    async fn fifo_get_messages_is_passthrough() {
        let mut memory = Memory::fifo(window_config(16));
        memory.add_message(Message::user("hello")).await;
        let context = memory.get_messages("hello").await;
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].text(), "hello");
    }

    #[tokio::test]
    async fn clear_empties_the_window() {
        let mut memory = Memory::fifo(window_config(16));
        memory.add_message(Message::user("a")).await;
        memory.add_message(Message::assistant("b")).await;
        memory.clear().await;
        assert!(memory.messages().is_empty());
        assert_eq!(memory.num_tokens(), 0);
    }

    // ── Hybrid-mode tests with scripted components ──

    /// Chat mock that records ask_tool inputs and replays scripted
    /// responses.
    struct ScriptedChat {
        responses: Mutex<Vec<ChatResponse>>,
        seen: Mutex<Vec<String>>,
        fail_ask: bool,
    }

    impl ScriptedChat {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
                fail_ask: false,
            }
        }

        fn failing() -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
                fail_ask: true,
            }
        }

        fn tool_response(name: &str, arguments: Value) -> ChatResponse {
            ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall::function(name, arguments)],
            }
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn ask(&self, _: &[Message], _: &str, _: &str) -> mentis_core::Result<String> {
            if self.fail_ask {
                return Err(mentis_core::Error::Upstream("scripted failure".into()));
            }
            Ok("warmup reply".into())
        }

        async fn ask_tool(
            &self,
            messages: &[Message],
            system: &str,
            _: &str,
            _: &[Value],
            _: ToolChoice,
        ) -> mentis_core::Result<ChatResponse> {
            let transcript = messages
                .iter()
                .map(|m| m.text())
                .collect::<Vec<_>>()
                .join("\n");
            self.seen
                .lock()
                .unwrap()
                .push(format!("{system}\n{transcript}"));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(ChatResponse::default());
            }
            Ok(responses.remove(0))
        }
    }

    struct FixedEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str, _: EmbeddingKind) -> mentis_core::Result<Vec<f32>> {
            // Deterministic pseudo-embedding from the text bytes.
            let mut v = vec![0.0f32; self.dims];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dims] += f32::from(b) / 255.0;
            }
            Ok(v)
        }

        fn dims(&self) -> usize {
            self.dims
        }
    }

    fn small_store() -> Arc<VectorStore> {
        Arc::new(
            VectorStore::new(VectorStoreConfig {
                dim: 8,
                max_elements: 64,
                ..VectorStoreConfig::default()
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn warmup_failure_falls_back_to_fifo() {
        let chat: Arc<dyn ChatClient> = Arc::new(ScriptedChat::failing());
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder { dims: 8 });
        let memory = Memory::with_components(
            window_config(16),
            chat,
            None,
            embedder,
            small_store(),
        )
        .await;
        assert!(!memory.retrieval_enabled());
    }

    #[tokio::test]
    async fn eviction_batch_reaches_the_fact_pipeline() {
        // fact_extract returns one fact; the memory tool files it as ADD.
        let chat = Arc::new(ScriptedChat::new(vec![
            ScriptedChat::tool_response("fact_extract", json!({"facts": ["User likes rust"]})),
            ScriptedChat::tool_response(
                "memory",
                json!({"events": [{"id": 0, "text": "User likes rust", "type": "ADD"}]}),
            ),
        ]));
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder { dims: 8 });
        let store = small_store();

        let mut memory = Memory::with_components(
            window_config(3),
            chat.clone() as Arc<dyn ChatClient>,
            None,
            embedder,
            store.clone(),
        )
        .await;
        assert!(memory.retrieval_enabled());

        memory.current_request = "remember me".into();
        memory.add_message(Message::user("u1")).await;
        memory.add_message(Message::assistant("a1")).await;
        memory.add_message(Message::user("u2")).await;
        memory.add_message(Message::assistant("a2")).await;

        // The extraction call saw the evicted messages, not the live ones.
        let seen = chat.seen.lock().unwrap().clone();
        assert!(!seen.is_empty());
        assert!(seen[0].contains("user: u1"));
        assert!(seen[0].contains("assistant: a1"));
        assert!(!seen[0].contains("u2"));
        assert!(seen[0].contains("remember me"));

        // The distilled fact landed in the vector store.
        assert_eq!(store.len(), 1);
        let items = store.list(0, None);
        assert_eq!(items[0].memory, "User likes rust");
    }

    #[tokio::test]
    async fn retrieval_prepends_memory_messages() {
        let chat: Arc<dyn ChatClient> = Arc::new(ScriptedChat::new(vec![]));
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder { dims: 8 });
        let store = small_store();

        // Pre-seed a long-term memory.
        let embedding = FixedEmbedder { dims: 8 }
            .embed("User prefers metric units", EmbeddingKind::Add)
            .await
            .unwrap();
        store
            .insert(&embedding, 42, MemoryItem::new(42, "User prefers metric units"))
            .unwrap();

        let mut memory =
            Memory::with_components(window_config(16), chat, None, embedder, store).await;
        memory.add_message(Message::user("what units?")).await;

        let context = memory.get_messages("units").await;
        assert_eq!(context.len(), 2);
        assert_eq!(
            context[0].text(),
            "<memory>User prefers metric units</memory>"
        );
        assert_eq!(context[1].text(), "what units?");
    }

    #[tokio::test]
    async fn pipeline_failure_disables_long_term_memory() {
        // Warmup succeeds, but the fact-extraction ask_tool path fails by
        // exhausting the scripted responses with an error.
        struct WarmOnlyChat;

        #[async_trait]
        impl ChatClient for WarmOnlyChat {
            async fn ask(&self, _: &[Message], _: &str, _: &str) -> mentis_core::Result<String> {
                Ok("warm".into())
            }
            async fn ask_tool(
                &self,
                _: &[Message],
                _: &str,
                _: &str,
                _: &[Value],
                _: ToolChoice,
            ) -> mentis_core::Result<ChatResponse> {
                Err(mentis_core::Error::Upstream("no tool endpoint".into()))
            }
        }

        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder { dims: 8 });
        let mut memory = Memory::with_components(
            window_config(2),
            Arc::new(WarmOnlyChat),
            None,
            embedder,
            small_store(),
        )
        .await;
        assert!(memory.retrieval_enabled());

        memory.add_message(Message::user("u1")).await;
        memory.add_message(Message::assistant("a1")).await;
        memory.add_message(Message::user("u2")).await;

        assert!(!memory.retrieval_enabled());
    }

    #[tokio::test]
    async fn vision_placeholder_without_vision_model() {
        let memory = Memory::fifo(window_config(16));
        let mut batch = vec![Message::user(vec![
            ContentPart::text("see "),
            ContentPart::image("data:image/png;base64,AA"),
        ])];
        memory.normalize_vision(&mut batch).await;
        assert_eq!(batch[0].text(), "see [image1]");
    }
}
