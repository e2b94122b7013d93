//! TOML configuration and environment secrets.
//!
//! Everything except API keys lives in the config file. Keys are read from
//! the environment by [`Secrets::from_env`] once at startup; a missing key is a
//! fatal [`ChatError::Config`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ChatError;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const PINECONE_API_KEY_ENV: &str = "PINECONE_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

/// OpenAI-compatible embedding + completion provider.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            embedding_model: default_embedding_model(),
            completion_model: default_completion_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

/// Hosted vector index. `provider = "memory"` keeps vectors in-process.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_provider")]
    pub provider: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    /// Data-plane host. Resolved from name + environment when unset.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_index_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            name: None,
            environment: None,
            host: None,
            namespace: None,
            upsert_batch_size: default_upsert_batch_size(),
            max_retries: default_index_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_provider() -> String {
    "pinecone".to_string()
}
fn default_upsert_batch_size() -> usize {
    100
}
fn default_index_max_retries() -> u32 {
    2
}

impl IndexConfig {
    pub fn is_memory(&self) -> bool {
        self.provider == "memory"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Name used in the system preamble ("the assistant on <owner>'s site").
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            owner: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_max_history_turns() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Overall budget for one chat request, covering every provider call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default)]
    pub blog_dir: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub profile_text: Option<String>,
    #[serde(default)]
    pub profile_file: Option<PathBuf>,
    /// Also embed catalog rows into the site assistant's index.
    #[serde(default)]
    pub include_catalog: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            blog_dir: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            profile_text: None,
            profile_file: None,
            include_catalog: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.mdx".to_string(),
        "**/*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    /// JSON file holding an array of catalog entries.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}

/// API keys read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub openai_api_key: String,
    pub pinecone_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("openai_api_key", &"<redacted>")
            .field(
                "pinecone_api_key",
                &self.pinecone_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Secrets {
    /// Read and validate required keys. The index key is only required
    /// for the hosted index.
    pub fn from_env(config: &Config) -> Result<Self, ChatError> {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        config: &Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ChatError> {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let openai_api_key = read(OPENAI_API_KEY_ENV).ok_or_else(|| {
            ChatError::Config(format!("{} environment variable not set", OPENAI_API_KEY_ENV))
        })?;

        let pinecone_api_key = if config.index.is_memory() {
            None
        } else {
            Some(read(PINECONE_API_KEY_ENV).ok_or_else(|| {
                ChatError::Config(format!(
                    "{} environment variable not set",
                    PINECONE_API_KEY_ENV
                ))
            })?)
        };

        Ok(Self {
            openai_api_key,
            pinecone_api_key,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ChatError> {
    let fail = |msg: &str| Err(ChatError::Config(msg.to_string()));

    match config.index.provider.as_str() {
        "pinecone" => {
            let has_name = config.index.name.as_deref().is_some_and(|s| !s.is_empty());
            let has_env = config
                .index
                .environment
                .as_deref()
                .is_some_and(|s| !s.is_empty());
            if config.index.host.is_none() && !(has_name && has_env) {
                return fail("index.name and index.environment (or index.host) are required");
            }
        }
        "memory" => {}
        other => {
            return Err(ChatError::Config(format!(
                "Unknown index provider: '{}'. Must be pinecone or memory.",
                other
            )))
        }
    }

    if config.index.upsert_batch_size == 0 {
        return fail("index.upsert_batch_size must be > 0");
    }
    if config.provider.batch_size == 0 {
        return fail("provider.batch_size must be > 0");
    }
    if config.provider.timeout_secs == 0 {
        return fail("provider.timeout_secs must be > 0");
    }
    if config.retrieval.top_k == 0 {
        return fail("retrieval.top_k must be >= 1");
    }
    if config.server.request_timeout_secs < config.provider.timeout_secs {
        return fail("server.request_timeout_secs must be >= provider.timeout_secs");
    }
    if config.chunking.enabled && config.chunking.overlap_chars >= config.chunking.max_chars {
        return fail("chunking.overlap_chars must be < chunking.max_chars");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[index]
name = "site"
environment = "us-east1-gcp"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.provider.timeout_secs, 30);
        assert_eq!(cfg.server.request_timeout_secs, 60);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!(!cfg.chunking.enabled);
        assert_eq!(cfg.index.name.as_deref(), Some("site"));
    }

    #[test]
    fn test_missing_index_name_rejected() {
        let err = parse_config("[index]\nenvironment = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("index.name"));
    }

    #[test]
    fn test_memory_index_needs_no_name() {
        let cfg = parse_config("[index]\nprovider = \"memory\"\n").unwrap();
        assert!(cfg.index.is_memory());
    }

    #[test]
    fn test_unknown_index_provider() {
        assert!(parse_config("[index]\nprovider = \"faiss\"\n").is_err());
    }

    #[test]
    fn test_request_budget_must_cover_provider_timeout() {
        let toml = format!("{}\n[server]\nrequest_timeout_secs = 10\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_secrets_fail_fast() {
        let cfg = parse_config(MINIMAL).unwrap();
        let err = Secrets::from_lookup(&cfg, |_| None).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));

        let err = Secrets::from_lookup(&cfg, |name| {
            (name == OPENAI_API_KEY_ENV).then(|| "sk-test".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(PINECONE_API_KEY_ENV));

        let ok = Secrets::from_lookup(&cfg, |_| Some("key".to_string())).unwrap();
        assert_eq!(ok.pinecone_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_secrets_memory_index_skips_pinecone_key() {
        let cfg = parse_config("[index]\nprovider = \"memory\"\n").unwrap();
        let s = Secrets::from_lookup(&cfg, |name| {
            (name == OPENAI_API_KEY_ENV).then(|| "sk-test".to_string())
        })
        .unwrap();
        assert!(s.pinecone_api_key.is_none());
    }
}
