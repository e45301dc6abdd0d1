//! Configuration loading.
//!
//! Settings come from an optional TOML file, then environment variables
//! (after loading `.env` when present) override individual fields. Every
//! section has defaults, so a missing file yields a usable configuration.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DOCQA_API_KEY` / `OPENROUTER_API_KEY` | `llm.api_key` |
//! | `DOCQA_LLM_MODEL` | `llm.model` |
//! | `DOCQA_LLM_BASE_URL` | `llm.base_url` |
//! | `DATABASE_URL` | `db.url` |
//! | `SYSTEM_PROMPT` | `prompt.system` |
//! | `DOCUMENTS_DIR` | `documents.dir` |
//! | `INDEX_PATH` | `index.path` |
//! | `DOCQA_BIND` | `server.bind` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./documents")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the persisted index generation.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Load the on-disk generation at first use when it was built from the
    /// same corpus fingerprint and embedding model.
    #[serde(default = "default_true")]
    pub reuse_persisted: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            reuse_persisted: true,
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// sqlx connection string, e.g. `sqlite://./data/docqa.sqlite`.
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

fn default_db_url() -> String {
    "sqlite://./data/docqa.sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local` (fastembed ONNX model) or `hashing` (feature hashing, no model files).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            api_key: None,
        }
    }
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_llm_model() -> String {
    "deepseek/deepseek-chat-v3.1:free".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    /// Line placed between the system prompt and the retrieved passages.
    #[serde(default = "default_context_instruction")]
    pub context_instruction: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            context_instruction: default_context_instruction(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a helpful assistant that answers questions about the provided documents.".to_string()
}
fn default_context_instruction() -> String {
    "Use ONLY the following information from the documents:".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HistoryConfig {
    /// Upper bound on the stored transcript, in characters. `0` disables the bound.
    #[serde(default)]
    pub max_chars: usize,
}

/// User-facing strings sent back through the transport.
#[derive(Debug, Deserialize, Clone)]
pub struct MessagesConfig {
    #[serde(default = "default_empty_query_message")]
    pub empty_query: String,
    #[serde(default = "default_failure_message")]
    pub failure: String,
    #[serde(default = "default_cleared_message")]
    pub cleared: String,
    #[serde(default = "default_greeting_message")]
    pub greeting: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            empty_query: default_empty_query_message(),
            failure: default_failure_message(),
            cleared: default_cleared_message(),
            greeting: default_greeting_message(),
        }
    }
}

fn default_empty_query_message() -> String {
    "Please send a text message.".to_string()
}
fn default_failure_message() -> String {
    "Something went wrong while processing your request. Please try again later.".to_string()
}
fn default_cleared_message() -> String {
    "Conversation history cleared.".to_string()
}
fn default_greeting_message() -> String {
    "Hi! Ask me anything about the documents. Send a clear request to reset the conversation."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8088".to_string()
}

/// Load configuration from `path` (if it exists), apply `.env` and
/// environment overrides, then validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let _ = dotenvy::dotenv();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Apply overrides from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("DOCQA_API_KEY").or_else(|| get("OPENROUTER_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = get("DOCQA_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = get("DOCQA_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(url) = get("DATABASE_URL") {
            self.db.url = url;
        }
        if let Some(prompt) = get("SYSTEM_PROMPT") {
            self.prompt.system = prompt;
        }
        if let Some(dir) = get("DOCUMENTS_DIR") {
            self.documents.dir = PathBuf::from(dir);
        }
        if let Some(path) = get("INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(bind) = get("DOCQA_BIND") {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_chars == 0 {
            anyhow::bail!("chunking.chunk_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.chunk_chars {
            anyhow::bail!(
                "chunking.overlap_chars ({}) must be smaller than chunking.chunk_chars ({})",
                self.chunking.overlap_chars,
                self.chunking.chunk_chars
            );
        }

        if self.retrieval.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if self.llm.max_tokens == 0 {
            anyhow::bail!("llm.max_tokens must be >= 1");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "local" | "hashing" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be local or hashing.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when set");
        }

        Ok(())
    }

    /// File holding the persisted index generation.
    pub fn index_db_path(&self) -> PathBuf {
        self.index.path.join("index.sqlite")
    }
}
