//! Configuration parsing and validation.
//!
//! The engine is configured from a single TOML file (default
//! `./config/hae.toml`). Every section except `[db]` is optional and falls
//! back to the defaults below. Secrets never live in the file: API keys and
//! REST tokens are read from the environment variables the file names.
//!
//! ```toml
//! [db]
//! path = "./data/hae.sqlite"
//!
//! [storage]
//! vector = "sqlite"
//! documents = "filesystem"
//! history = "sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl Config {
    /// All-in-memory configuration with the deterministic hash embedder and
    /// no chat model. Used by tests and `--dry-run` style tooling.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from(":memory:"),
            },
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                model: Some("hash".to_string()),
                dims: Some(64),
                ..EmbeddingConfig::default()
            },
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:1122".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Environment variable holding the PEM-encoded RS256 public key.
    #[serde(default = "default_public_key_env")]
    pub public_key_env: String,
    /// Alternative to `public_key_env`: read the PEM from a file.
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    #[serde(default)]
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_key_env: default_public_key_env(),
            public_key_path: None,
            leeway_secs: 0,
        }
    }
}

fn default_public_key_env() -> String {
    "CLERK_PEM_PUBLIC_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_memory_backend")]
    pub vector: String,
    #[serde(default = "default_memory_backend")]
    pub documents: String,
    #[serde(default = "default_memory_backend")]
    pub history: String,
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    #[serde(default)]
    pub upstash_vector: UpstashVectorConfig,
    #[serde(default)]
    pub upstash_redis: UpstashRedisConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vector: default_memory_backend(),
            documents: default_memory_backend(),
            history: default_memory_backend(),
            documents_dir: default_documents_dir(),
            upstash_vector: UpstashVectorConfig::default(),
            upstash_redis: UpstashRedisConfig::default(),
        }
    }
}

fn default_memory_backend() -> String {
    "memory".to_string()
}
fn default_documents_dir() -> PathBuf {
    PathBuf::from("./data/vectorstore/kv")
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstashVectorConfig {
    #[serde(default = "default_vector_url_env")]
    pub url_env: String,
    #[serde(default = "default_vector_token_env")]
    pub token_env: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for UpstashVectorConfig {
    fn default() -> Self {
        Self {
            url_env: default_vector_url_env(),
            token_env: default_vector_token_env(),
            namespace: default_namespace(),
        }
    }
}

fn default_vector_url_env() -> String {
    "UPSTASH_VECTOR_REST_URL".to_string()
}
fn default_vector_token_env() -> String {
    "UPSTASH_VECTOR_REST_TOKEN".to_string()
}
fn default_namespace() -> String {
    "v11".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstashRedisConfig {
    #[serde(default = "default_redis_url_env")]
    pub url_env: String,
    #[serde(default = "default_redis_token_env")]
    pub token_env: String,
}

impl Default for UpstashRedisConfig {
    fn default() -> Self {
        Self {
            url_env: default_redis_url_env(),
            token_env: default_redis_token_env(),
        }
    }
}

fn default_redis_url_env() -> String {
    "UPSTASH_REDIS_REST_URL".to_string()
}
fn default_redis_token_env() -> String {
    "UPSTASH_REDIS_REST_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_parent_splitter")]
    pub parent: SplitterConfig,
    #[serde(default = "default_child_splitter")]
    pub child: SplitterConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            parent: default_parent_splitter(),
            child: default_child_splitter(),
        }
    }
}

fn default_parent_splitter() -> SplitterConfig {
    SplitterConfig {
        chunk_size: 2000,
        chunk_overlap: 200,
    }
}
fn default_child_splitter() -> SplitterConfig {
    SplitterConfig {
        chunk_size: 400,
        chunk_overlap: 50,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_targeted_k")]
    pub targeted_k: usize,
    #[serde(default = "default_broad_k")]
    pub broad_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            targeted_k: default_targeted_k(),
            broad_k: default_broad_k(),
        }
    }
}

fn default_targeted_k() -> usize {
    1
}
fn default_broad_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            temperature: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Replaces the built-in system instruction when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
        }
    }
}

fn default_max_iterations() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Remove `[hh:mm:ss]` transcript markers.
    #[serde(default = "default_true")]
    pub strip_timestamps: bool,
    #[serde(default = "default_true")]
    pub collapse_whitespace: bool,
    /// Skip documents whose cleaned text is longer than this many characters.
    #[serde(default)]
    pub max_chars: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: default_ingest_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            strip_timestamps: true,
            collapse_whitespace: true,
            max_chars: None,
        }
    }
}

fn default_ingest_root() -> PathBuf {
    PathBuf::from("./data/sources")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string()]
}
fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    for (name, splitter) in [
        ("parent", config.chunking.parent),
        ("child", config.chunking.child),
    ] {
        if splitter.chunk_size == 0 {
            bail!("chunking.{}.chunk_size must be > 0", name);
        }
        if splitter.chunk_overlap >= splitter.chunk_size {
            bail!(
                "chunking.{}.chunk_overlap must be < chunk_size ({} >= {})",
                name,
                splitter.chunk_overlap,
                splitter.chunk_size
            );
        }
    }
    if config.chunking.parent.chunk_size < config.chunking.child.chunk_size {
        bail!("chunking.parent.chunk_size must be >= chunking.child.chunk_size");
    }

    // Retrieval
    if config.retrieval.targeted_k == 0 || config.retrieval.broad_k == 0 {
        bail!("retrieval.targeted_k and retrieval.broad_k must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // LLM
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.agent.max_iterations == 0 {
        bail!("agent.max_iterations must be >= 1");
    }

    // Storage
    for (name, value, allowed) in [
        ("vector", &config.storage.vector, &["memory", "sqlite", "upstash"][..]),
        (
            "documents",
            &config.storage.documents,
            &["memory", "sqlite", "filesystem"][..],
        ),
        ("history", &config.storage.history, &["memory", "sqlite", "upstash"][..]),
    ] {
        if !allowed.contains(&value.as_str()) {
            bail!(
                "Unknown storage.{} backend: '{}'. Must be one of: {}",
                name,
                value,
                allowed.join(", ")
            );
        }
    }

    Ok(())
}
