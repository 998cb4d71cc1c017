use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::models::{ModelDescriptor, ModelRegistry};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Channel users must join before chatting, `@username` or numeric id
    #[serde(default)]
    pub required_channel: Option<String>,
    /// User id allowed to broadcast; also receives new-user notices
    #[serde(default)]
    pub admin_id: Option<u64>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl TelegramConfig {
    /// The gate channel, treating an empty string as unset
    pub fn required_channel(&self) -> Option<&str> {
        self.required_channel
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            queue_size: default_queue_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            default_model: default_model(),
            timeout_secs: default_completion_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryBackend {
    #[default]
    Sqlite,
    Firebase,
}

impl std::fmt::Display for DirectoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryBackend::Sqlite => write!(f, "sqlite"),
            DirectoryBackend::Firebase => write!(f, "firebase"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub backend: DirectoryBackend,
    /// Realtime Database root, e.g. `https://project.firebaseio.com`
    #[serde(default)]
    pub firebase_url: Option<String>,
    #[serde(default = "default_directory_timeout")]
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            backend: DirectoryBackend::default(),
            firebase_url: None,
            timeout_secs: default_directory_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub sessions: SessionBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            sessions: SessionBackend::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    /// Pause between two recipients, keeps us under the outbound rate limit
    #[serde(default = "default_broadcast_delay")]
    pub delay_ms: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// How long finished broadcasts stay in the journal
    #[serde(default = "default_journal_retention")]
    pub journal_retention_days: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_broadcast_delay(),
            session_ttl_secs: default_session_ttl(),
            journal_retention_days: default_journal_retention(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_gate_timeout")]
    pub timeout_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_gate_timeout(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_queue_size() -> usize {
    256
}

fn default_completion_base_url() -> String {
    "https://arsychat-api.metaspace.workers.dev/api".to_string()
}

fn default_model() -> String {
    "GLM".to_string()
}

fn default_completion_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_directory_timeout() -> u64 {
    15
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gatebot.db")
}

fn default_broadcast_delay() -> u64 {
    30
}

fn default_session_ttl() -> u64 {
    600
}

fn default_journal_retention() -> u64 {
    7
}

fn default_gate_timeout() -> u64 {
    10
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)?;

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                config.telegram.bot_token = token;
            }
        }
        if config.telegram.bot_token.is_empty() {
            anyhow::bail!("telegram.bot_token is not set (config file or TELEGRAM_BOT_TOKEN)");
        }

        Ok(config)
    }

    /// Parse and validate a config document without touching the environment
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let registry = self.model_registry();
        if let Some(alias) = self.default_model() {
            if registry.get(alias).is_none() {
                anyhow::bail!(
                    "completion.default_model '{}' is not a registered model (known: {})",
                    alias,
                    registry.aliases().join(", ")
                );
            }
        }

        if self.directory.backend == DirectoryBackend::Firebase
            && self
                .directory
                .firebase_url
                .as_deref()
                .map_or(true, |u| u.trim().is_empty())
        {
            anyhow::bail!("directory.firebase_url is required for the firebase backend");
        }

        Ok(())
    }

    /// Model used for users who never picked one; an empty alias disables
    /// the fallback and such users are asked to choose first
    pub fn default_model(&self) -> Option<&str> {
        Some(self.completion.default_model.trim()).filter(|a| !a.is_empty())
    }

    /// Configured models, or the built-in set when none are listed
    pub fn model_registry(&self) -> ModelRegistry {
        if self.completion.models.is_empty() {
            ModelRegistry::builtin()
        } else {
            ModelRegistry::new(self.completion.models.clone())
        }
    }
}
