//! Backend configuration for completion providers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for a single completion backend
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Command to execute (or base URL for HTTP backends)
    pub command: String,

    /// Arguments passed before the prompt
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Model name (HTTP backends)
    pub model: Option<String>,

    /// Environment variable holding the API key (HTTP backends)
    pub api_key_env: Option<String>,

    /// Sampling temperature (HTTP backends)
    pub temperature: Option<f32>,

    /// Maximum retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Additional environment variables for the command
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            enabled: true,
            timeout: default_timeout(),
            model: None,
            api_key_env: None,
            temperature: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            env: HashMap::new(),
        }
    }
}

impl BackendConfig {
    /// Returns true if this is an HTTP API backend (command is a URL)
    pub fn is_http(&self) -> bool {
        self.command.starts_with("http://") || self.command.starts_with("https://")
    }

    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let config: BackendConfig = toml::from_str(r#"command = "claude""#).unwrap();
        assert_eq!(config.command, "claude");
        assert!(config.enabled);
        assert_eq!(config.timeout, 120);
        assert_eq!(config.max_retries, 3);
        assert!(!config.is_http());
    }

    #[test]
    fn test_deserialize_http_backend() {
        let toml = r#"
            command = "https://api.openai.com/v1"
            model = "gpt-4o-mini"
            api_key_env = "DAYFLOW_TEST_UNSET_KEY"
            temperature = 0.2
            max_retries = 5
        "#;
        let config: BackendConfig = toml::from_str(toml).unwrap();
        assert!(config.is_http());
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.api_key(), None);
    }

    #[test]
    fn test_reject_unknown_fields() {
        let toml = r#"
            command = "claude"
            unknown_field = "value"
        "#;
        let result: Result<BackendConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
