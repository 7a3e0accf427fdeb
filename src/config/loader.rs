//! Configuration loading with multi-layer merge

use super::BackendConfig;
use super::sections::{
    CompletionConfig, Defaults, GithubConfig, StoreConfig, default_api_url, default_concurrency,
    default_max_pages, default_store_path, default_timeout, default_token_env,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level dayflow configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DayflowConfig {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub completion: CompletionConfig,

    /// Backend definitions
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,

    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl DayflowConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/dayflow/config.toml
    /// 3. .dayflow/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = Self::project_config_path(project_dir);
        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        tracing::debug!(
            backends = config.backends.len(),
            repositories = config.github.repositories.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// ~/.config/dayflow/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dayflow/config.toml"))
    }

    pub fn project_config_path(project_dir: Option<&Path>) -> PathBuf {
        project_dir
            .map(|p| p.join(".dayflow/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".dayflow/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.defaults.concurrency != default_concurrency() {
            self.defaults.concurrency = other.defaults.concurrency;
        }
        if other.defaults.timeout != default_timeout() {
            self.defaults.timeout = other.defaults.timeout;
        }

        if other.completion.backend.is_some() {
            self.completion.backend = other.completion.backend;
        }
        if other.completion.max_message_chars.is_some() {
            self.completion.max_message_chars = other.completion.max_message_chars;
        }
        if other.completion.prompts_dir.is_some() {
            self.completion.prompts_dir = other.completion.prompts_dir;
        }

        for (name, backend) in other.backends {
            self.backends.insert(name, backend);
        }

        if other.github.api_url != default_api_url() {
            self.github.api_url = other.github.api_url;
        }
        if other.github.token_env != default_token_env() {
            self.github.token_env = other.github.token_env;
        }
        if !other.github.repositories.is_empty() {
            self.github.repositories = other.github.repositories;
        }
        if other.github.max_pages != default_max_pages() {
            self.github.max_pages = other.github.max_pages;
        }

        if other.store.path != default_store_path() {
            self.store.path = other.store.path;
        }
    }

    /// Name and config of the backend that answers completion requests
    pub fn completion_backend(&self) -> Option<(&str, &BackendConfig)> {
        match &self.completion.backend {
            Some(name) => self
                .backends
                .get_key_value(name)
                .filter(|(_, b)| b.enabled)
                .map(|(n, b)| (n.as_str(), b)),
            None => self
                .enabled_backends()
                .next()
                .map(|(n, b)| (n.as_str(), b)),
        }
    }

    /// Get all enabled backends
    pub fn enabled_backends(&self) -> impl Iterator<Item = (&String, &BackendConfig)> {
        self.backends.iter().filter(|(_, b)| b.enabled)
    }

    /// Semantic checks that deserialization cannot express
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.defaults.concurrency == 0 {
            errors.push("defaults.concurrency must be at least 1".to_string());
        }

        if let Some(name) = &self.completion.backend {
            match self.backends.get(name) {
                None => errors.push(format!("completion.backend '{}' is not defined", name)),
                Some(b) if !b.enabled => {
                    errors.push(format!("completion.backend '{}' is disabled", name))
                }
                Some(_) => {}
            }
        }

        for (name, backend) in &self.backends {
            if backend.command.trim().is_empty() {
                errors.push(format!("backend '{}' has no command", name));
            }
        }

        for repo in &self.github.repositories {
            let valid = repo
                .split_once('/')
                .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
            if !valid {
                errors.push(format!("repository '{}' must be written as owner/name", repo));
            }
        }

        if self.github.max_pages == 0 {
            errors.push("github.max_pages must be at least 1".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
