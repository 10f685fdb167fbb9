//! Tests for Config serialization, defaults and file round-trips

use notewright_config::{AgentDefaults, Config, ProviderConfig};
use tempfile::TempDir;

fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[test]
fn test_agent_defaults() {
    let defaults = AgentDefaults::default();
    assert_eq!(defaults.workspace, "~/.notewright/notes");
    assert_eq!(defaults.model, "anthropic/claude-sonnet-4");
    assert_eq!(defaults.max_tokens, 4096);
    assert_eq!(defaults.temperature, 0.7);
    assert_eq!(defaults.max_provider_retries, 3);
    assert_eq!(defaults.approval_timeout_secs, 300);
    assert_eq!(defaults.tool_timeout_secs, 60);
}

#[test]
fn test_provider_config_defaults() {
    let provider = ProviderConfig::default();
    assert!(provider.api_key.is_empty());
    assert_eq!(provider.api_base, None);
}

/// Missing sections and fields fall back to their defaults
#[test]
fn test_partial_json_uses_defaults() {
    let json = r#"{ "agent": { "model": "openai/gpt-4o", "auto_approve": true } }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.agent.model, "openai/gpt-4o");
    assert!(config.agent.auto_approve);
    assert_eq!(config.agent.max_consecutive_errors, 3);
    assert_eq!(config.agent.default_mode, "editor");
    assert!(config.providers.openrouter.api_key.is_empty());
}

#[test]
fn test_empty_json_is_default() {
    let config: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(config.agent.max_context_messages, 40);
    assert!(!config.has_api_key());
}

#[test]
fn test_api_base_is_skipped_when_none() {
    let config = Config::default();
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("api_base"));
}

#[tokio::test]
async fn test_save_and_load_round_trip() {
    let dir = temp_dir();
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.agent.default_mode = "writer".to_string();
    config.agent.tool_timeout_secs = 5;
    config.providers.openrouter.api_key = "sk-or-test".to_string();

    config.save_to(&path).await.unwrap();
    assert!(path.exists());

    let loaded = Config::load_from(&path).await.unwrap();
    assert_eq!(loaded.agent.default_mode, "writer");
    assert_eq!(loaded.agent.tool_timeout_secs, 5);
    assert_eq!(loaded.api_key().as_deref(), Some("sk-or-test"));
}

#[tokio::test]
async fn test_load_missing_file_returns_default() {
    let dir = temp_dir();
    let config = Config::load_from(&dir.path().join("absent.json"))
        .await
        .unwrap();
    assert_eq!(config.agent.model, "anthropic/claude-sonnet-4");
}

#[test]
fn test_workspace_path_expands_home() {
    let mut config = Config::default();
    config.agent.workspace = "/srv/notes".to_string();
    assert_eq!(config.workspace_path(), std::path::PathBuf::from("/srv/notes"));

    config.agent.workspace = "~/vault".to_string();
    if let Some(home) = dirs::home_dir() {
        assert_eq!(config.workspace_path(), home.join("vault"));
    }
}

#[test]
fn test_openai_api_base_used_without_openrouter_key() {
    let mut config = Config::default();
    config.providers.openai.api_key = "sk-openai".to_string();
    assert_eq!(config.api_base(), None);

    config.providers.openai.api_base = Some("http://localhost:8000/v1".to_string());
    assert_eq!(config.api_base().as_deref(), Some("http://localhost:8000/v1"));
}
