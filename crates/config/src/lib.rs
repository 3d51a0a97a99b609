//! Configuration loading and management for mentis.
//!
//! Five named-keyed namespaces are merged from TOML at startup: `llm`,
//! `mcp_server`, `mem`, `embd`, and `vec`. Every consumer looks entries up
//! by name; a missing name transparently falls back to the `default` entry
//! of that namespace with a warning.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{info, warn};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("No `{name}` entry and no `default` fallback in [{namespace}]")]
    MissingEntry { namespace: String, name: String },

    #[error("Configuration already installed")]
    AlreadyInstalled,
}

// ── LLM ───────────────────────────────────────────────────────────────────

/// Settings for one chat-completions endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Vision detail hint forwarded with image parts.
    #[serde(default = "default_vision_details")]
    pub vision_details: String,

    /// Cap on completion tokens. None lets the provider decide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout: u64,

    /// None lets the provider decide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub enable_vision: bool,

    /// When false, tool calling is emulated by parsing fenced blocks out of
    /// the reply content.
    #[serde(default = "default_true")]
    pub enable_tool: bool,

    #[serde(default)]
    pub enable_thinking: bool,

    /// Opening delimiter for emulated tool calls.
    #[serde(default = "default_tool_start")]
    pub tool_start: String,

    /// Closing delimiter for emulated tool calls.
    #[serde(default = "default_tool_end")]
    pub tool_end: String,

    /// Hint template for emulated tool calls; None uses the built-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_hint_template: Option<String>,
}

fn default_llm_model() -> String {
    "deepseek-chat".into()
}
fn default_llm_base_url() -> String {
    "https://api.deepseek.com".into()
}
fn default_llm_endpoint() -> String {
    "/v1/chat/completions".into()
}
fn default_vision_details() -> String {
    "auto".into()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_tool_start() -> String {
    "<tool_call>".into()
}
fn default_tool_end() -> String {
    "</tool_call>".into()
}
fn default_true() -> bool {
    true
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_key: String::new(),
            base_url: default_llm_base_url(),
            endpoint: default_llm_endpoint(),
            vision_details: default_vision_details(),
            max_tokens: None,
            timeout: default_llm_timeout(),
            temperature: None,
            enable_vision: false,
            enable_tool: true,
            enable_thinking: false,
            tool_start: default_tool_start(),
            tool_end: default_tool_end(),
            tool_hint_template: None,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("enable_vision", &self.enable_vision)
            .field("enable_tool", &self.enable_tool)
            .finish_non_exhaustive()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &str) -> &'static str {
    if s.is_empty() {
        "None"
    } else {
        "[REDACTED]"
    }
}

// ── MCP server ────────────────────────────────────────────────────────────

/// Transport flavor of an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    Stdio,
    Sse,
}

/// How to reach one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(rename = "type")]
    pub kind: McpTransportKind,

    /// stdio: the command to spawn.
    #[serde(default)]
    pub command: String,

    /// stdio: arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// stdio: environment variables merged into the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// sse: host, used together with `port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// sse: port, used together with `host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// sse: full base URL, alternative to host+port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ── Memory ────────────────────────────────────────────────────────────────

/// Settings for one hybrid memory instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of messages in the short-term window.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Maximum number of tokens in a single message.
    #[serde(default = "default_max_tokens_message")]
    pub max_tokens_message: usize,

    /// Maximum total tokens in the short-term window.
    #[serde(default = "default_max_tokens_messages")]
    pub max_tokens_messages: usize,

    /// Maximum tokens in an assembled context (window + retrieved memories).
    #[serde(default = "default_max_tokens_context")]
    pub max_tokens_context: usize,

    /// Maximum number of long-term items retrieved per query.
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,

    /// Override for the fact-extraction system prompt; None uses the
    /// built-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_extraction_prompt: Option<String>,

    /// Override for the update-memory prompt; None uses the built-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_memory_prompt: Option<String>,

    /// Name of the embedding config to use.
    #[serde(default = "default_name")]
    pub embedding_model: String,

    /// Name of the vector-store config to use.
    #[serde(default = "default_name")]
    pub vector_store: String,

    /// Name of the LLM config used by the fact pipeline.
    #[serde(default = "default_name")]
    pub llm: String,

    /// Name of the vision-capable LLM config used to describe images.
    #[serde(default = "default_vision_name")]
    pub llm_vision: String,
}

fn default_max_messages() -> usize {
    16
}
fn default_max_tokens_message() -> usize {
    1 << 15
}
fn default_max_tokens_messages() -> usize {
    1 << 16
}
fn default_max_tokens_context() -> usize {
    1 << 17
}
fn default_retrieval_limit() -> usize {
    32
}
fn default_name() -> String {
    "default".into()
}
fn default_vision_name() -> String {
    "vision_default".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_tokens_message: default_max_tokens_message(),
            max_tokens_messages: default_max_tokens_messages(),
            max_tokens_context: default_max_tokens_context(),
            retrieval_limit: default_retrieval_limit(),
            fact_extraction_prompt: None,
            update_memory_prompt: None,
            embedding_model: default_name(),
            vector_store: default_name(),
            llm: default_name(),
            llm_vision: default_vision_name(),
        }
    }
}

// ── Embedding ─────────────────────────────────────────────────────────────

/// Settings for one embeddings endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embd_provider")]
    pub provider: String,

    #[serde(default = "default_embd_base_url")]
    pub base_url: String,

    #[serde(default = "default_embd_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embd_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_embd_dims")]
    pub embedding_dims: usize,

    #[serde(default = "default_embd_retries")]
    pub max_retries: usize,
}

fn default_embd_provider() -> String {
    "oai".into()
}
fn default_embd_base_url() -> String {
    "http://localhost:8080".into()
}
fn default_embd_endpoint() -> String {
    "/v1/embeddings".into()
}
fn default_embd_model() -> String {
    "nomic-embed-text-v1.5.f16.gguf".into()
}
fn default_embd_dims() -> usize {
    768
}
fn default_embd_retries() -> usize {
    3
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embd_provider(),
            base_url: default_embd_base_url(),
            endpoint: default_embd_endpoint(),
            model: default_embd_model(),
            api_key: String::new(),
            embedding_dims: default_embd_dims(),
            max_retries: default_embd_retries(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("embedding_dims", &self.embedding_dims)
            .finish_non_exhaustive()
    }
}

// ── Vector store ──────────────────────────────────────────────────────────

/// Distance metric for the ANN index. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    L2,
    IP,
}

/// Settings for one vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vec_provider")]
    pub provider: String,

    /// Dimension of stored vectors.
    #[serde(default = "default_vec_dim")]
    pub dim: usize,

    /// Maximum number of elements; oldest metadata is evicted beyond this.
    #[serde(default = "default_vec_max_elements")]
    pub max_elements: usize,

    /// HNSW connectivity; strongly affects memory consumption.
    #[serde(default = "default_vec_m", rename = "M")]
    pub m: usize,

    /// HNSW index build/search speed tradeoff.
    #[serde(default = "default_vec_ef_construction")]
    pub ef_construction: usize,

    #[serde(default = "default_vec_metric")]
    pub metric: Metric,
}

fn default_vec_provider() -> String {
    "hnsw".into()
}
fn default_vec_dim() -> usize {
    16
}
fn default_vec_max_elements() -> usize {
    10_000
}
fn default_vec_m() -> usize {
    16
}
fn default_vec_ef_construction() -> usize {
    200
}
fn default_vec_metric() -> Metric {
    Metric::L2
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vec_provider(),
            dim: default_vec_dim(),
            max_elements: default_vec_max_elements(),
            m: default_vec_m(),
            ef_construction: default_vec_ef_construction(),
            metric: default_vec_metric(),
        }
    }
}

// ── Merged application config ─────────────────────────────────────────────

/// The merged configuration: five named-keyed namespaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: HashMap<String, LlmConfig>,

    #[serde(default)]
    pub mcp_server: HashMap<String, McpServerConfig>,

    #[serde(default)]
    pub mem: HashMap<String, MemoryConfig>,

    #[serde(default)]
    pub embd: HashMap<String, EmbeddingConfig>,

    #[serde(default)]
    pub vec: HashMap<String, VectorStoreConfig>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn lookup<'a, T>(
        namespace: &'static str,
        entries: &'a HashMap<String, T>,
        name: &str,
    ) -> Result<&'a T, ConfigError> {
        if let Some(entry) = entries.get(name) {
            return Ok(entry);
        }
        if let Some(fallback) = entries.get("default") {
            warn!(namespace, name, "Config entry not found, falling back to `default`");
            return Ok(fallback);
        }
        Err(ConfigError::MissingEntry {
            namespace: namespace.into(),
            name: name.into(),
        })
    }

    pub fn llm_config(&self, name: &str) -> Result<&LlmConfig, ConfigError> {
        Self::lookup("llm", &self.llm, name)
    }

    pub fn mcp_server_config(&self, name: &str) -> Result<&McpServerConfig, ConfigError> {
        Self::lookup("mcp_server", &self.mcp_server, name)
    }

    pub fn memory_config(&self, name: &str) -> Result<&MemoryConfig, ConfigError> {
        Self::lookup("mem", &self.mem, name)
    }

    pub fn embedding_config(&self, name: &str) -> Result<&EmbeddingConfig, ConfigError> {
        Self::lookup("embd", &self.embd, name)
    }

    pub fn vector_store_config(&self, name: &str) -> Result<&VectorStoreConfig, ConfigError> {
        Self::lookup("vec", &self.vec, name)
    }
}

static GLOBAL: OnceLock<AppConfig> = OnceLock::new();

/// Install the process-wide configuration. May only be called once.
pub fn install(config: AppConfig) -> Result<(), ConfigError> {
    GLOBAL.set(config).map_err(|_| ConfigError::AlreadyInstalled)
}

/// The process-wide configuration. Defaults to an empty config when nothing
/// was installed.
pub fn global() -> &'static AppConfig {
    GLOBAL.get_or_init(AppConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_namespaces() {
        let toml_str = r#"
[llm.default]
model = "deepseek-chat"
api_key = "sk-test"
base_url = "https://api.deepseek.com"

[llm.vision_default]
model = "gpt-4o"
enable_vision = true

[mcp_server.files]
type = "stdio"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "."]

[mcp_server.remote]
type = "sse"
host = "127.0.0.1"
port = 8896

[mem.default]
max_messages = 8
retrieval_limit = 4

[embd.default]
base_url = "http://localhost:8080"
embedding_dims = 32

[vec.default]
dim = 32
M = 24
metric = "IP"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.llm_config("default").unwrap().model, "deepseek-chat");
        assert!(config.llm_config("vision_default").unwrap().enable_vision);

        let files = config.mcp_server_config("files").unwrap();
        assert_eq!(files.kind, McpTransportKind::Stdio);
        assert_eq!(files.args.len(), 3);

        let remote = config.mcp_server_config("remote").unwrap();
        assert_eq!(remote.kind, McpTransportKind::Sse);
        assert_eq!(remote.port, Some(8896));

        assert_eq!(config.memory_config("default").unwrap().max_messages, 8);
        assert_eq!(config.embedding_config("default").unwrap().embedding_dims, 32);

        let vec_cfg = config.vector_store_config("default").unwrap();
        assert_eq!(vec_cfg.m, 24);
        assert_eq!(vec_cfg.metric, Metric::IP);
    }

    #[test]
    fn missing_name_falls_back_to_default() {
        let toml_str = r#"
[llm.default]
model = "fallback-model"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm_config("nonexistent").unwrap().model, "fallback-model");
    }

    #[test]
    fn missing_default_is_an_error() {
        let config = AppConfig::default();
        assert!(matches!(
            config.llm_config("anything"),
            Err(ConfigError::MissingEntry { .. })
        ));
    }

    #[test]
    fn defaults_mirror_the_shipped_values() {
        let mem = MemoryConfig::default();
        assert_eq!(mem.max_messages, 16);
        assert_eq!(mem.max_tokens_message, 1 << 15);
        assert_eq!(mem.max_tokens_messages, 1 << 16);
        assert_eq!(mem.max_tokens_context, 1 << 17);
        assert_eq!(mem.retrieval_limit, 32);
        assert_eq!(mem.llm_vision, "vision_default");

        let vec_cfg = VectorStoreConfig::default();
        assert_eq!(vec_cfg.dim, 16);
        assert_eq!(vec_cfg.max_elements, 10_000);
        assert_eq!(vec_cfg.m, 16);
        assert_eq!(vec_cfg.ef_construction, 200);
        assert_eq!(vec_cfg.metric, Metric::L2);

        let llm = LlmConfig::default();
        assert_eq!(llm.timeout, 120);
        assert!(llm.enable_tool);
        assert!(!llm.enable_vision);
        assert_eq!(llm.tool_start, "<tool_call>");
    }

    #[test]
    fn api_keys_are_redacted_in_debug() {
        let llm = LlmConfig {
            api_key: "sk-secret".into(),
            ..LlmConfig::default()
        };
        let debug = format!("{llm:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = AppConfig::default();
        config.llm.insert("default".into(), LlmConfig::default());
        config.vec.insert("default".into(), VectorStoreConfig::default());

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.llm["default"].model, config.llm["default"].model);
        assert_eq!(parsed.vec["default"].m, config.vec["default"].m);
    }
}
