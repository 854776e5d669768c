//! Configuration loading, validation, and management for orbit.
//!
//! Loads configuration from `~/.orbit/config.toml` with environment
//! variable overrides. Validates all settings at startup; a missing
//! credential is reported before any request is attempted.

use orbit_core::agent::LoopSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Built-in instructions for the coding assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are orbit, an AI coding assistant with access to tools for file operations, code execution, and workspace management. Default language is Python.

You can:
- Read, write, and delete files in the workspace
- Execute shell commands
- Search for files and list directories

When the user asks you to perform a task, use the appropriate tools to accomplish it. Be explicit about what you are doing, explain the results, and handle tool errors gracefully.";

/// The root configuration structure.
///
/// Maps directly to `~/.orbit/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max output tokens per model request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Routing / preference hint forwarded to the backend
    #[serde(default = "default_route")]
    pub route: String,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Loop safeguards and tool budgets
    #[serde(default)]
    pub agent: AgentSection,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-haiku-4.5".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    20_000
}
fn default_route() -> String {
    "throughput".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("route", &self.route)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("agent", &self.agent)
            .finish()
    }
}

/// `[agent]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Tool-dispatch round trips allowed per user submission
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Per-call tool time budget in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Cap on concurrently executing tool calls (absent = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_tools: Option<usize>,
}

fn default_max_iterations() -> u32 {
    orbit_core::agent::DEFAULT_MAX_ITERATIONS
}
fn default_tool_timeout_secs() -> u64 {
    orbit_core::agent::DEFAULT_TOOL_TIMEOUT.as_secs()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_parallel_tools: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.orbit/config.toml).
    ///
    /// Environment overrides:
    /// - `ORBIT_API_KEY`, then `OPENROUTER_API_KEY`
    /// - `OPENROUTER_BASE_URL`
    /// - `ORBIT_MODEL`, then `OPENROUTER_DEFAULT_MODEL`
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("ORBIT_API_KEY").or_else(|| non_empty("OPENROUTER_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = non_empty("OPENROUTER_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = non_empty("ORBIT_MODEL").or_else(|| non_empty("OPENROUTER_DEFAULT_MODEL")) {
            self.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".orbit")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than 0".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_timeout_secs must be at least 1".into(),
            ));
        }
        if self.agent.max_parallel_tools == Some(0) {
            return Err(ConfigError::ValidationError(
                "agent.max_parallel_tools must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// The API key, or a configuration error naming where to set it.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential)
    }

    /// The system prompt in effect.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// Loop settings derived from this configuration.
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            route: Some(self.route.clone()).filter(|r| !r.is_empty()),
            max_iterations: self.agent.max_iterations,
            tool_timeout: Duration::from_secs(self.agent.tool_timeout_secs),
            max_parallel_tools: self.agent.max_parallel_tools,
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            route: default_route(),
            system_prompt: None,
            agent: AgentSection::default(),
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

    #[error("No API key configured; set OPENROUTER_API_KEY or api_key in ~/.orbit/config.toml")]
    MissingCredential,
}

impl From<ConfigError> for orbit_core::Error {
    fn from(err: ConfigError) -> Self {
        orbit_core::Error::Config {
            message: err.to_string(),
        }
    }
}
