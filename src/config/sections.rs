//! Non-backend configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global default settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Commits analyzed at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Default timeout in seconds for collaborator calls
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

pub(crate) fn default_concurrency() -> usize {
    3
}

pub(crate) fn default_timeout() -> u64 {
    120
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout: default_timeout(),
        }
    }
}

/// Which backend answers completion requests
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompletionConfig {
    /// Backend name from `[backends]`; the first enabled backend when unset
    pub backend: Option<String>,

    /// Commit messages included in a prompt are cut to this many characters
    pub max_message_chars: Option<usize>,

    /// Directory of `<name>.j2` files overriding the built-in prompts
    pub prompts_dir: Option<String>,
}

impl CompletionConfig {
    pub fn resolved_prompts_dir(&self) -> Option<PathBuf> {
        self.prompts_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }
}

/// GitHub activity source
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the access token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Repositories as `owner/name`
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Pages of 100 commits fetched per repository at most
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

pub(crate) fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

pub(crate) fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

pub(crate) fn default_max_pages() -> u32 {
    5
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            repositories: Vec::new(),
            max_pages: default_max_pages(),
        }
    }
}

impl GithubConfig {
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.is_empty())
    }
}

/// Where reports and run history are kept
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database path; `~` is expanded
    #[serde(default = "default_store_path")]
    pub path: String,
}

pub(crate) fn default_store_path() -> String {
    "~/.local/share/dayflow/dayflow.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_defaults() {
        let config: GithubConfig = toml::from_str("").unwrap();
        assert_eq!(config.api_url, "https://api.github.com");
        assert_eq!(config.token_env, "GITHUB_TOKEN");
        assert_eq!(config.max_pages, 5);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_store_path_expands_tilde() {
        let config = StoreConfig {
            path: "~/reports/dayflow.db".into(),
        };
        let resolved = config.resolved_path();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.ends_with("reports/dayflow.db"));

        let absolute = StoreConfig {
            path: "/var/lib/dayflow.db".into(),
        };
        assert_eq!(absolute.resolved_path(), PathBuf::from("/var/lib/dayflow.db"));
    }
}
