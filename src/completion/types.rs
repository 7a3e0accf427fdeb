//! Core types and traits for completion backends

use crate::config::BackendConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors a completion backend can return
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// No answer within the request or backend timeout
    #[error("timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Provider throttled the request
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit { retry_after: Option<Duration> },

    /// Credentials missing or rejected
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Connection could not be made or was dropped
    #[error("network error: {message}")]
    Network { message: String },

    /// Output could not be turned into what the caller asked for
    #[error("parse error: {message}")]
    Parse { message: String },

    /// CLI backend exited unsuccessfully
    #[error("execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Backend binary or endpoint is not there
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// Backend settings cannot be used as given
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl BackendError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout { .. }
                | BackendError::RateLimit { .. }
                | BackendError::Network { .. }
        )
    }

    /// Server-suggested delay for rate limit errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Timeout after `elapsed`
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Rate limit, with the provider's suggested wait if it sent one
    pub fn rate_limit(retry_after: Option<Duration>) -> Self {
        Self::RateLimit { retry_after }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt and system prompt
    pub prompt_tokens: Option<u32>,
    /// Tokens in the reply
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Raw answer from a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// Reply text as returned, before any JSON extraction
    pub text: String,

    /// Backend name that produced this response
    pub backend: String,

    /// Model reported by the provider, if any
    pub model: Option<String>,

    /// Wall time of the call
    pub duration: Duration,

    /// Token counts when the provider reports them
    pub usage: Option<TokenUsage>,
}

impl BackendResponse {
    /// Response carrying only text
    pub fn new(text: impl Into<String>, backend: impl Into<String>, duration: Duration) -> Self {
        Self {
            text: text.into(),
            backend: backend.into(),
            model: None,
            duration,
            usage: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A prompt to send to a backend
#[derive(Debug, Clone, Default)]
pub struct BackendRequest {
    /// User prompt
    pub prompt: String,

    /// Instructions sent ahead of the prompt, where the backend supports it
    pub system_prompt: Option<String>,

    /// Overrides the backend's default timeout
    pub timeout: Option<Duration>,
}

impl BackendRequest {
    /// Request with just a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Something that can answer a prompt
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Send one request and wait for the reply
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Name from the `[backends.<name>]` table
    fn name(&self) -> &str;

    /// Cheap reachability probe used by `doctor`
    async fn is_available(&self) -> bool {
        true
    }
}

#[async_trait]
impl BackendExecutor for Box<dyn BackendExecutor> {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        (**self).execute(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay, including server-suggested ones
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to every delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.retry_delay_ms),
            ..Default::default()
        }
    }

    /// Delay before retrying after `error`
    ///
    /// A server-suggested delay is honoured up to `max_delay`.
    pub fn delay_after(&self, error: &BackendError, attempt: u32) -> Duration {
        match error.retry_after() {
            Some(delay) => delay.min(self.max_delay),
            None => self.delay_for_attempt(attempt),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            capped + rand::random::<f64>() * 0.25 * capped
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_retryable() {
        assert!(BackendError::timeout(Duration::from_secs(30)).is_retryable());
        assert!(BackendError::rate_limit(None).is_retryable());
        assert!(BackendError::network("connection reset").is_retryable());

        assert!(!BackendError::auth("invalid token").is_retryable());
        assert!(!BackendError::parse("no JSON in output").is_retryable());
        assert!(!BackendError::unavailable("not installed").is_retryable());
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::rate_limit(Some(Duration::from_secs(60)));
        assert!(err.to_string().contains("rate limit"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));

        let err = BackendError::ExecutionFailed {
            exit_code: Some(2),
            stderr: "bad flag".into(),
        };
        assert!(err.to_string().contains("exit code"));
        assert!(err.to_string().contains("bad flag"));
    }

    #[test]
    fn test_request_builder() {
        let request = BackendRequest::new("Summarize this commit")
            .with_system_prompt("You review code")
            .with_timeout(Duration::from_secs(30));

        assert_eq!(request.prompt, "Summarize this commit");
        assert_eq!(request.system_prompt.as_deref(), Some("You review code"));
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_policy_jitter_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(400),
            jitter: true,
            ..Default::default()
        };

        let delay = policy.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(400));
        assert!(delay <= Duration::from_millis(500));
    }

    #[test]
    fn test_policy_from_config() {
        let config = BackendConfig {
            command: "claude".into(),
            max_retries: 5,
            retry_delay_ms: 250,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
    }
}
