//! Configuration for a3s-shell
//!
//! Provides configuration for:
//! - The model provider (base URL, model, API key)
//! - Confirmation behavior and the tool allow-list
//! - The shell program used by the `bash` tool
//! - RPC tool servers to connect on startup
//!
//! Loaded from a JSON file (`camelCase` keys), then overridden by environment
//! variables, then by command-line flags. The file is never written back.

use crate::hitl::ConfirmationPolicy;
use crate::rpc::RpcServerConfig;
use crate::shell::ShellProgram;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable names
pub const ENV_API_KEY: &str = "A3S_SHELL_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "A3S_SHELL_BASE_URL";
pub const ENV_MODEL: &str = "A3S_SHELL_MODEL";

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tool_rounds() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Model provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// OpenAI-compatible endpoint, without `/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Read the key from this variable when `apiKey` is absent
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_env: None,
        }
    }
}

/// Configuration for a3s-shell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Skip confirmation for every tool
    #[serde(default)]
    pub auto_confirm: bool,

    /// Tools that never need confirmation
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Replaces the built-in system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Shell program backing the `bash` tool
    #[serde(default)]
    pub shell: ShellProgram,

    #[serde(default)]
    pub rpc_servers: Vec<RpcServerConfig>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Reject (or auto-approve) confirmations left unanswered this long
    #[serde(default)]
    pub confirm_timeout_secs: Option<u64>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            auto_confirm: false,
            allowed_tools: Vec::new(),
            max_tool_rounds: default_max_tool_rounds(),
            system_prompt: None,
            shell: ShellProgram::default(),
            rpc_servers: Vec::new(),
            log_level: default_log_level(),
            confirm_timeout_secs: None,
        }
    }
}

impl ShellConfig {
    /// Default config location: `<config dir>/a3s-shell/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("a3s-shell").join("config.json"))
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e)
        })?;

        Ok(config)
    }

    /// Load `path`, or the default location if it exists, or built-in defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => {
                    tracing::debug!(path = %path.display(), "Loading default config");
                    Self::from_file(&path)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.provider.api_key = Some(key);
        } else if self.provider.api_key.is_none() {
            let fallback = self
                .provider
                .api_key_env
                .as_deref()
                .and_then(|name| get(name))
                .or_else(|| get(ENV_OPENAI_API_KEY));
            self.provider.api_key = fallback;
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.provider.base_url = url;
        }
        if let Some(model) = get(ENV_MODEL) {
            self.provider.model = model;
        }
    }

    /// Confirmation policy described by this config
    pub fn policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            auto_confirm: self.auto_confirm,
            ..Default::default()
        }
        .with_allowed_tools(self.allowed_tools.iter().cloned())
    }
}
