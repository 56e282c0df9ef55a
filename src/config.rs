use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: Option<ChatConfig>,
    #[serde(default)]
    pub search: SearchConfig,
    pub server: ServerConfig,
}

/// Which exact-match strategy backs `POST /search` and the table layout
/// created by `mcs init`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Containment,
    Hash,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Containment => "containment",
            MatchMode::Hash => "hash",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_match_mode")]
    pub match_mode: MatchMode,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a pooled connection before it is recycled.
    #[serde(default = "default_recycle")]
    pub recycle_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_table() -> String {
    "malicious_code".to_string()
}
fn default_match_mode() -> MatchMode {
    MatchMode::Containment
}
fn default_min_connections() -> u32 {
    4
}
fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout() -> u64 {
    5
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_recycle() -> u64 {
    3600
}
fn default_command_timeout() -> u64 {
    10
}

impl DbConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_class_name")]
    pub class_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            class_name: default_class_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_url() -> String {
    "http://localhost:8011".to_string()
}
fn default_class_name() -> String {
    "Security".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `openai` and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Inputs longer than this many characters are truncated before encoding.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: 64,
            max_retries: 3,
            timeout_secs: 30,
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
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
fn default_max_input_chars() -> usize {
    4096
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Chat model used by the query simplifier. Absent section disables simplification.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub model: String,
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
}

fn default_chat_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_certainty")]
    pub certainty: f64,
    /// Upper bound on concurrent vector-store lookups per request.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    /// Queries longer than this (in characters) go through the simplifier.
    #[serde(default = "default_clean_threshold")]
    pub max_clean_threshold: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            certainty: default_certainty(),
            max_threads: default_max_threads(),
            max_clean_threshold: default_clean_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_certainty() -> f64 {
    0.8
}
fn default_max_threads() -> usize {
    20
}
fn default_clean_threshold() -> usize {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reject settings that would only fail later, at request time.
pub fn validate(config: &Config) -> Result<()> {
    let db = &config.db;
    if db.table.is_empty()
        || !db
            .table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || db.table.starts_with(|c: char| c.is_ascii_digit())
    {
        bail!(
            "db.table must be a plain SQL identifier (letters, digits, underscore), got '{}'",
            db.table
        );
    }
    if db.max_connections == 0 {
        bail!("db.max_connections must be >= 1");
    }
    if db.min_connections > db.max_connections {
        bail!(
            "db.min_connections ({}) must not exceed db.max_connections ({})",
            db.min_connections,
            db.max_connections
        );
    }
    if db.command_timeout_secs == 0 {
        bail!("db.command_timeout_secs must be > 0");
    }

    if config.search.top_k == 0 {
        bail!("search.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.search.certainty) {
        bail!("search.certainty must be in [0.0, 1.0]");
    }
    if config.search.max_threads == 0 {
        bail!("search.max_threads must be >= 1");
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

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if let Some(chat) = &config.chat {
        if chat.model.trim().is_empty() {
            bail!("chat.model must not be empty");
        }
    }

    Ok(())
}
