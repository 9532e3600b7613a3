//! Configuration management
//!
//! This module handles loading, validation, and management of the opsagent
//! configuration. Configuration is stored in TOML format at
//! ~/.opsagent/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level and the web root used by prompt preprocessing
//! - **user**: Caller identity embedded in the system instruction
//! - **llm**: Model backend endpoint, model and sampling parameters
//! - **agent**: Orchestration loop limits and timeouts
//! - **capabilities**: Capability module directory and hot reload
//! - **knowledge_base**: Retrieval augmentation settings
//!
//! # Environment Expansion
//!
//! Every string value may reference environment variables as `${VAR}` or
//! `${VAR:-default}`. References to unset variables without a default are
//! left untouched.
//!
//! # Examples
//!
//! ```no_run
//! use opsagent_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Model: {}", config.llm.model);
//! println!("Capabilities: {:?}", config.capabilities.dir);
//! # Ok(())
//! # }
//! ```

mod manager;

pub use manager::{ConfigListener, ConfigManager};

use regex::Regex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "OPSAGENT_API_KEY";

/// Keychain service name used for the API key fallback
pub const KEYRING_SERVICE: &str = "opsagent";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Caller identity
    #[serde(default)]
    pub user: UserConfig,

    /// Model backend configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Orchestration loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Capability registry configuration
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,

    /// Retrieval augmentation configuration
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root directory for `@{file(...)}` prompt expansions (supports ~ expansion)
    #[serde(default = "default_web_root")]
    pub web_root: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            web_root: default_web_root(),
        }
    }
}

/// Identity of the caller, embedded in the system instruction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// Login name. Falls back to the `USER` environment variable.
    #[serde(default)]
    pub username: Option<String>,

    /// Human readable name. Falls back to the username.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserConfig {
    /// Resolve the username, consulting the environment when unset
    pub fn resolved_username(&self) -> Option<String> {
        self.username
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
    }
}

/// Model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider label, used as the keychain account name
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// API key. Prefer `${OPSAGENT_API_KEY}` or the OS keychain over a literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum completion tokens per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LLMConfig {
    /// Resolve the API key.
    ///
    /// Lookup order: the configured value, the `OPSAGENT_API_KEY` environment
    /// variable, then the OS keychain entry `opsagent/<provider>`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                return Some(key);
            }
        }

        match keyring::Entry::new(KEYRING_SERVICE, &self.provider) {
            Ok(entry) => match entry.get_password() {
                Ok(key) => Some(key),
                Err(keyring::Error::NoEntry) => None,
                Err(e) => {
                    tracing::debug!("Keychain lookup failed: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::debug!("Failed to create keyring entry: {}", e);
                None
            }
        }
    }
}

/// Orchestration loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model turns per invocation before the forced summary
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Transcript token estimate above which history compression runs
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,

    /// Tool message token estimate above which a message is compressed
    #[serde(default = "default_compress_message_tokens")]
    pub compress_message_tokens: usize,

    /// Serialized tool result length (chars) above which it is truncated
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,

    /// Characters per estimated token
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,

    /// Key terms whose values are redacted in surfaced events
    #[serde(default = "default_sensitive_keys")]
    pub sensitive_keys: Vec<String>,

    /// Timeout for establishing a model response (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum silence between two streamed deltas (seconds)
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    /// Timeout for a single tool call (seconds)
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Base retry backoff (milliseconds), multiplied by the attempt number
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_history_tokens: default_max_history_tokens(),
            compress_message_tokens: default_compress_message_tokens(),
            max_tool_result_chars: default_max_tool_result_chars(),
            chars_per_token: default_chars_per_token(),
            sensitive_keys: default_sensitive_keys(),
            request_timeout_secs: default_request_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Capability registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Directory scanned for capability modules (supports ~ expansion)
    #[serde(default = "default_capabilities_dir")]
    pub dir: PathBuf,

    /// Modules whose name starts with this prefix are ignored
    #[serde(default = "default_exclude_prefix")]
    pub exclude_prefix: String,

    /// Run the periodic hot-reload check
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// Interval between hot-reload checks (milliseconds)
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            dir: default_capabilities_dir(),
            exclude_prefix: default_exclude_prefix(),
            hot_reload: true,
            hot_reload_interval_ms: default_hot_reload_interval(),
        }
    }
}

impl CapabilitiesConfig {
    pub fn hot_reload_interval(&self) -> Duration {
        Duration::from_millis(self.hot_reload_interval_ms)
    }
}

/// Retrieval augmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Enable the knowledge base client
    #[serde(default)]
    pub enabled: bool,

    /// Augment every prompt automatically
    #[serde(default = "default_true")]
    pub auto_rag: bool,

    /// Number of documents requested per query
    #[serde(default = "default_n_results")]
    pub n_results: usize,

    /// Base URL of the Chroma server
    #[serde(default = "default_chroma_url")]
    pub base_url: String,

    /// Collection queried for documents
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_rag: true,
            n_results: default_n_results(),
            base_url: default_chroma_url(),
            collection_name: default_collection_name(),
        }
    }
}

impl KnowledgeBaseConfig {
    /// Whether prompts should be augmented before the first model turn
    pub fn augments_prompts(&self) -> bool {
        self.enabled && self.auto_rag
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_web_root() -> PathBuf {
    PathBuf::from("~/.opsagent/www")
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_iterations() -> usize {
    100
}

fn default_max_history_tokens() -> usize {
    80_000
}

fn default_compress_message_tokens() -> usize {
    10_000
}

fn default_max_tool_result_chars() -> usize {
    50_000
}

fn default_chars_per_token() -> f64 {
    2.5
}

fn default_sensitive_keys() -> Vec<String> {
    ["access_token", "token", "password", "secret", "api_key"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_stream_idle_timeout() -> u64 {
    600
}

fn default_tool_timeout() -> u64 {
    300
}

fn default_retry_backoff() -> u64 {
    2000
}

fn default_capabilities_dir() -> PathBuf {
    PathBuf::from("~/.opsagent/capabilities")
}

fn default_exclude_prefix() -> String {
    "_".to_string()
}

fn default_hot_reload_interval() -> u64 {
    2000
}

fn default_n_results() -> usize {
    5
}

fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_collection_name() -> String {
    "ops_docs".to_string()
}

impl Config {
    /// Load configuration from the default location (~/.opsagent/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there first if absent
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse, expand and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut raw: toml::Value = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        expand_env_vars(&mut raw);

        let mut config: Config = raw
            .try_into()
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Created default configuration at {}", path.display());

        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.opsagent/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".opsagent").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// Validates enumerations and limits, then expands ~ in paths.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.llm.base_url.trim().is_empty() {
            return Err(EngineError::Config("llm.base_url must not be empty".to_string()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(EngineError::Config("llm.model must not be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        let agent = &self.agent;
        let limits = [
            ("agent.max_iterations", agent.max_iterations),
            ("agent.max_history_tokens", agent.max_history_tokens),
            ("agent.compress_message_tokens", agent.compress_message_tokens),
            ("agent.max_tool_result_chars", agent.max_tool_result_chars),
            ("agent.request_timeout_secs", agent.request_timeout_secs as usize),
            ("agent.stream_idle_timeout_secs", agent.stream_idle_timeout_secs as usize),
            ("agent.tool_timeout_secs", agent.tool_timeout_secs as usize),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(EngineError::Config(format!("{} must be positive", name)));
            }
        }
        if agent.chars_per_token.is_nan() || agent.chars_per_token <= 0.0 {
            return Err(EngineError::Config(
                "agent.chars_per_token must be positive".to_string(),
            ));
        }

        if self.capabilities.hot_reload_interval_ms == 0 {
            return Err(EngineError::Config(
                "capabilities.hot_reload_interval_ms must be positive".to_string(),
            ));
        }
        if self.knowledge_base.n_results == 0 {
            return Err(EngineError::Config(
                "knowledge_base.n_results must be positive".to_string(),
            ));
        }

        self.capabilities.dir = expand_path(&self.capabilities.dir)?;
        self.core.web_root = expand_path(&self.core.web_root)?;

        Ok(())
    }
}

static ENV_PATTERN: OnceLock<Regex> = OnceLock::new();

fn env_pattern() -> &'static Regex {
    ENV_PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid env pattern"))
}

/// Expand `${VAR}` and `${VAR:-default}` in a single string
pub fn expand_env_str(input: &str) -> String {
    env_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let expr = &caps[1];
            let (name, default) = match expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (expr, None),
            };
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => match default {
                    Some(default) if !default.is_empty() => default.to_string(),
                    _ => caps[0].to_string(),
                },
            }
        })
        .into_owned()
}

/// Recursively expand environment references in every string of a TOML tree
pub fn expand_env_vars(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if s.contains("${") {
                *s = expand_env_str(s);
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(expand_env_vars),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_env_vars(v)),
        _ => {}
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.agent.max_iterations, 100);
        assert_eq!(config.agent.max_history_tokens, 80_000);
        assert_eq!(config.agent.max_tool_result_chars, 50_000);
        assert_eq!(config.agent.chars_per_token, 2.5);
        assert_eq!(config.capabilities.exclude_prefix, "_");
        assert_eq!(config.knowledge_base.collection_name, "ops_docs");
        assert!(!config.knowledge_base.augments_prompts());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.capabilities.dir.is_absolute());
    }

    #[test]
    fn test_expand_env_with_default() {
        std::env::remove_var("OPSAGENT_TEST_UNSET_VAR");
        assert_eq!(
            expand_env_str("http://${OPSAGENT_TEST_UNSET_VAR:-localhost}:8000"),
            "http://localhost:8000"
        );
        assert_eq!(
            expand_env_str("${OPSAGENT_TEST_UNSET_VAR}"),
            "${OPSAGENT_TEST_UNSET_VAR}"
        );
    }

    #[test]
    fn test_expand_env_set_variable() {
        std::env::set_var("OPSAGENT_TEST_MODEL_VAR", "deepseek-chat");
        let config = Config::from_toml_str(
            r#"
[llm]
model = "${OPSAGENT_TEST_MODEL_VAR}"
"#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "deepseek-chat");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Config::from_toml_str("[core]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let err = Config::from_toml_str("[agent]\nmax_iterations = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_iterations"));

        let err = Config::from_toml_str("[agent]\nchars_per_token = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("chars_per_token"));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_configured_api_key_wins() {
        let llm = LLMConfig {
            api_key: Some("sk-configured".to_string()),
            ..LLMConfig::default()
        };
        assert_eq!(llm.resolve_api_key().as_deref(), Some("sk-configured"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized = Config::from_toml_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.llm.base_url, deserialized.llm.base_url);
    }
}
