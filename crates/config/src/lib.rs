//! Configuration loading, validation, and management for diskdoc.
//!
//! Loads configuration from `~/.diskdoc/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use diskdoc_core::agent::AgentConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Provider names accepted in `llm_provider`.
pub const SUPPORTED_PROVIDERS: &[&str] = &["anthropic", "openai"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// The root configuration structure.
///
/// Maps directly to `~/.diskdoc/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which vendor to talk to: "anthropic" or "openai"
    #[serde(default = "default_provider")]
    pub llm_provider: String,

    /// Run commands without asking the operator first
    #[serde(default)]
    pub auto_approve_commands: bool,

    /// Log level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Anthropic Messages API settings
    #[serde(default = "ProviderConfig::anthropic")]
    pub anthropic: ProviderConfig,

    /// OpenAI chat completions settings
    #[serde(default = "ProviderConfig::openai")]
    pub openai: ProviderConfig,

    /// Client-side rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Agent loop and context management
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Per-vendor connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub model: String,

    /// Override the vendor base URL (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Maximum tokens to generate per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ProviderConfig {
    fn with_model(model: &str) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            api_url: None,
            max_tokens: default_max_tokens(),
        }
    }

    pub fn anthropic() -> Self {
        Self::with_model("claude-haiku-4-5-20251001")
    }

    pub fn openai() -> Self {
        Self::with_model("gpt-5")
    }

    /// The API key, if one is set and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Sliding-window admission limits applied before each request.
///
/// A limit of zero disables that dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_tokens_per_window")]
    pub tokens_per_window: u64,

    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u64,
}

fn default_window_secs() -> u64 {
    60
}
fn default_tokens_per_window() -> u64 {
    50_000
}
fn default_requests_per_window() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            tokens_per_window: default_tokens_per_window(),
            requests_per_window: default_requests_per_window(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.diskdoc/config.toml).
    ///
    /// Environment overrides:
    /// - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY` (only when the file has no key)
    /// - `DISKDOC_PROVIDER`, `DISKDOC_MODEL`, `DISKDOC_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.anthropic.credential().is_none() {
            if let Some(key) = lookup("ANTHROPIC_API_KEY") {
                self.anthropic.api_key = Some(key);
            }
        }
        if self.openai.credential().is_none() {
            if let Some(key) = lookup("OPENAI_API_KEY") {
                self.openai.api_key = Some(key);
            }
        }
        if let Some(provider) = lookup("DISKDOC_PROVIDER") {
            self.llm_provider = provider.trim().to_lowercase();
        }
        if let Some(model) = lookup("DISKDOC_MODEL") {
            self.active_provider_mut().model = model;
        }
        if let Some(level) = lookup("DISKDOC_LOG_LEVEL") {
            self.log_level = level.trim().to_lowercase();
        }
    }

    /// Settings of the provider selected by `llm_provider`.
    pub fn active_provider(&self) -> &ProviderConfig {
        match self.llm_provider.as_str() {
            "openai" => &self.openai,
            _ => &self.anthropic,
        }
    }

    fn active_provider_mut(&mut self) -> &mut ProviderConfig {
        match self.llm_provider.as_str() {
            "openai" => &mut self.openai,
            _ => &mut self.anthropic,
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".diskdoc")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_PROVIDERS.contains(&self.llm_provider.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown llm_provider '{}' (expected one of: {})",
                self.llm_provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.keep_recent == 0 {
            return Err(ConfigError::ValidationError(
                "agent.keep_recent must be at least 1".into(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.window_secs must be at least 1".into(),
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log_level '{}'",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Check if the selected provider has an API key.
    pub fn has_api_key(&self) -> bool {
        self.active_provider().credential().is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_provider: default_provider(),
            anthropic: ProviderConfig::anthropic(),
            openai: ProviderConfig::openai(),
            rate_limit: RateLimitConfig::default(),
            agent: AgentConfig::default(),
            auto_approve_commands: false,
            log_level: default_log_level(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
