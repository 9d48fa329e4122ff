//! Configuration loading, validation, and management for codeloop.
//!
//! Loads configuration from `~/.codeloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.codeloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context compaction settings
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Permission policy settings
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Tool execution limits
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Session storage
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// "anthropic" or "openai" (any OpenAI-compatible endpoint)
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model override; the provider's default model is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Context window override in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,
}

fn default_provider_kind() -> String {
    "anthropic".into()
}
fn default_max_tokens() -> u32 {
    8192
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            api_key: None,
            base_url: None,
            model: None,
            context_window: None,
            max_tokens: default_max_tokens(),
            temperature: 0.0,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("context_window", &self.context_window)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider calls allowed per turn (0 = unlimited)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Replace the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_max_iterations() -> u32 {
    50
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Tool results kept verbatim by observation masking
    #[serde(default = "default_keep_recent_results")]
    pub keep_recent_results: usize,

    /// Complete turns retained after a full compaction
    #[serde(default = "default_keep_turns")]
    pub keep_turns: usize,

    /// Send-time trimming never goes below this many turns
    #[serde(default = "default_min_turns")]
    pub min_turns: usize,

    /// Skip high-importance tool output during gentle masking
    #[serde(default = "default_true")]
    pub protect_high_importance: bool,

    #[serde(default = "default_high_importance_tools")]
    pub high_importance_tools: Vec<String>,

    #[serde(default = "default_low_importance_tools")]
    pub low_importance_tools: Vec<String>,
}

fn default_keep_recent_results() -> usize {
    10
}
fn default_keep_turns() -> usize {
    10
}
fn default_min_turns() -> usize {
    5
}
fn default_high_importance_tools() -> Vec<String> {
    vec!["read_file".into(), "bash".into()]
}
fn default_low_importance_tools() -> Vec<String> {
    vec!["grep".into(), "glob".into(), "list_dir".into(), "web_search".into()]
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            keep_recent_results: default_keep_recent_results(),
            keep_turns: default_keep_turns(),
            min_turns: default_min_turns(),
            protect_high_importance: true,
            high_importance_tools: default_high_importance_tools(),
            low_importance_tools: default_low_importance_tools(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Allow every call that is not explicitly denied
    #[serde(default)]
    pub unrestricted: bool,

    /// Shell command prefixes that run without confirmation
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Substrings that make a shell command fail outright
    #[serde(default = "default_denied_commands")]
    pub denied_commands: Vec<String>,

    /// Globs write tools may target; empty means unrestricted
    #[serde(default)]
    pub allowed_paths: Vec<String>,

    /// Tools that never need confirmation
    #[serde(default = "default_auto_approve_tools")]
    pub auto_approve_tools: Vec<String>,

    #[serde(default = "default_shell_tools")]
    pub shell_tools: Vec<String>,

    #[serde(default = "default_write_tools")]
    pub write_tools: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    // Read-only commands only; `find` and cargo can modify the tree
    ["ls", "pwd", "cat", "head", "tail", "wc", "grep", "git status", "git diff", "git log"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_denied_commands() -> Vec<String> {
    ["sudo", "rm -rf /", "mkfs", "dd if=", ":(){", "shutdown", "reboot"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_auto_approve_tools() -> Vec<String> {
    ["read_file", "list_dir", "glob", "grep"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_shell_tools() -> Vec<String> {
    vec!["bash".into()]
}
fn default_write_tools() -> Vec<String> {
    vec!["write_file".into(), "edit_file".into()]
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            unrestricted: false,
            allowed_commands: default_allowed_commands(),
            denied_commands: default_denied_commands(),
            allowed_paths: vec![],
            auto_approve_tools: default_auto_approve_tools(),
            shell_tools: default_shell_tools(),
            write_tools: default_write_tools(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_tool_timeout() -> u64 {
    120
}
fn default_max_output_bytes() -> usize {
    30_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Session directory; defaults to `~/.codeloop/sessions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.codeloop/config.toml).
    ///
    /// Environment overrides:
    /// - `CODELOOP_API_KEY` (highest priority), then `ANTHROPIC_API_KEY` or
    ///   `OPENAI_API_KEY` depending on the provider kind
    /// - `CODELOOP_PROVIDER`, `CODELOOP_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
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

    fn apply_env(&mut self) {
        if let Ok(kind) = std::env::var("CODELOOP_PROVIDER") {
            self.provider.kind = kind;
        }

        if let Ok(model) = std::env::var("CODELOOP_MODEL") {
            self.provider.model = Some(model);
        }

        if let Ok(key) = std::env::var("CODELOOP_API_KEY") {
            self.provider.api_key = Some(key);
        } else if self.provider.api_key.is_none() {
            let vendor_var = match self.provider.kind.as_str() {
                "openai" => "OPENAI_API_KEY",
                _ => "ANTHROPIC_API_KEY",
            };
            self.provider.api_key = std::env::var(vendor_var).ok();
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".codeloop")
    }

    /// Directory holding saved sessions.
    pub fn sessions_dir(&self) -> PathBuf {
        self.storage
            .dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("sessions"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.provider.kind.as_str(), "anthropic" | "openai") {
            return Err(ConfigError::ValidationError(format!(
                "provider.kind must be \"anthropic\" or \"openai\", got \"{}\"",
                self.provider.kind
            )));
        }

        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if let Some(window) = self.provider.context_window
            && window < 1024
        {
            return Err(ConfigError::ValidationError(
                "provider.context_window must be at least 1024 tokens".into(),
            ));
        }

        if self.tools.timeout_secs == 0 || self.tools.timeout_secs > 600 {
            return Err(ConfigError::ValidationError(
                "tools.timeout_secs must be between 1 and 600".into(),
            ));
        }

        if self.agent.retry_max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "agent.retry_max_attempts must be at least 1".into(),
            ));
        }

        if self.compaction.keep_turns == 0 {
            return Err(ConfigError::ValidationError(
                "compaction.keep_turns must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
