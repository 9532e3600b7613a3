//! Integration tests for configuration management
//!
//! These tests verify that a configuration file is loaded, expanded and
//! validated, and that a `ConfigManager` picks up edits on reload.

use opsagent_engine::config::{Config, ConfigManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[core]
log_level = "debug"
web_root = "/srv/opsagent/www"

[user]
username = "jdoe"
display_name = "Jane Doe"

[llm]
provider = "openai"
base_url = "${OPSAGENT_IT_BASE_URL:-http://localhost:8080/v1}"
model = "qwen2.5-72b-instruct"
temperature = 0.3
max_tokens = 4096

[agent]
max_iterations = 12
max_tool_result_chars = 20000
sensitive_keys = ["password", "cookie"]
tool_timeout_secs = 60

[capabilities]
dir = "/opt/opsagent/capabilities"
exclude_prefix = "__"
hot_reload = false

[knowledge_base]
enabled = true
n_results = 3
collection_name = "runbooks"
"#;

#[test]
fn test_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.user.resolved_username().as_deref(), Some("jdoe"));
    assert_eq!(config.user.display_name.as_deref(), Some("Jane Doe"));
    assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
    assert_eq!(config.llm.model, "qwen2.5-72b-instruct");
    assert_eq!(config.llm.max_tokens, 4096);

    assert_eq!(config.agent.max_iterations, 12);
    assert_eq!(config.agent.max_tool_result_chars, 20_000);
    assert_eq!(config.agent.sensitive_keys, vec!["password", "cookie"]);
    assert_eq!(config.agent.tool_timeout().as_secs(), 60);
    // Unspecified keys keep their defaults
    assert_eq!(config.agent.max_history_tokens, 80_000);
    assert_eq!(config.agent.chars_per_token, 2.5);

    assert_eq!(config.capabilities.exclude_prefix, "__");
    assert!(!config.capabilities.hot_reload);
    assert!(config.knowledge_base.augments_prompts());
    assert_eq!(config.knowledge_base.collection_name, "runbooks");
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[agent]\nchars_per_token = 0.0\n").unwrap();
    assert!(Config::load_from_path(&path).is_err());

    std::fs::write(&path, "[llm\nmodel = ").unwrap();
    assert!(Config::load_from_path(&path).is_err());
}

#[test]
fn test_default_file_is_created_and_reloadable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let created = Config::load_or_create_at(&path).unwrap();
    assert!(path.exists());
    assert_eq!(created.agent.max_iterations, 100);

    let reread = Config::load_from_path(&path).unwrap();
    assert_eq!(reread.llm.model, created.llm.model);
    assert_eq!(reread.capabilities.dir, created.capabilities.dir);
}

#[test]
fn test_manager_reload_applies_edits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[agent]\nmax_iterations = 5\n").unwrap();

    let manager = ConfigManager::load(&path).unwrap();
    assert_eq!(manager.config().agent.max_iterations, 5);

    let seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&seen);
    manager.on_reload(Box::new(move |config: &Config| -> Result<(), String> {
        observed.store(config.agent.max_iterations, Ordering::SeqCst);
        Ok(())
    }));

    std::fs::write(&path, "[agent]\nmax_iterations = 9\n").unwrap();
    manager.reload().unwrap();
    assert_eq!(manager.config().agent.max_iterations, 9);
    assert_eq!(seen.load(Ordering::SeqCst), 9);

    std::fs::write(&path, "[agent]\nmax_iterations = 0\n").unwrap();
    assert!(manager.reload().is_err());
    assert_eq!(manager.config().agent.max_iterations, 9);
}
