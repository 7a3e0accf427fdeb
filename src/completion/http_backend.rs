//! OpenAI-compatible HTTP backend

use super::types::{BackendError, BackendExecutor, BackendRequest, BackendResponse, TokenUsage};
use crate::config::BackendConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Backend speaking the `/chat/completions` protocol
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// Name from the `[backends.<name>]` table
    name: String,

    /// API root; `/chat/completions` is appended
    base_url: String,

    /// Bearer token, resolved from the configured environment variable
    api_key: Option<String>,

    /// Model id sent with every request
    model: Option<String>,

    /// Sampling temperature, left to the provider when unset
    temperature: Option<f32>,

    /// Default per-request timeout
    timeout: Duration,

    client: reqwest::Client,
}

/// Body of a `/chat/completions` call
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// Reply of a `/chat/completions` call; only the fields we read
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

impl HttpBackend {
    /// Backend for a `[backends.<name>]` table whose `command` is the base URL
    pub fn from_config(name: impl Into<String>, config: &BackendConfig) -> Result<Self, BackendError> {
        let backend = Self::new(name, config.command.clone())?
            .with_timeout(Duration::from_secs(config.timeout));
        Ok(Self {
            api_key: config.api_key(),
            model: config.model.clone(),
            temperature: config.temperature,
            ..backend
        })
    }

    /// Backend with defaults for everything but name and URL
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dayflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            model: None,
            temperature: None,
            timeout: Duration::from_secs(120),
            client,
        })
    }

    /// Set the bearer token
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the model id
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn chat_completion_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Map a non-success status to a BackendError
    fn map_http_error(&self, status: reqwest::StatusCode, body: &str) -> BackendError {
        match status.as_u16() {
            401 | 403 => BackendError::auth(format!("HTTP {}: {}", status, body)),
            429 => BackendError::rate_limit(parse_retry_after(body)),
            408 | 504 => BackendError::timeout(self.timeout),
            400..=499 => BackendError::config(format!("HTTP {}: {}", status, body)),
            _ => BackendError::network(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// `retry_after` seconds from a JSON error body
fn parse_retry_after(body: &str) -> Option<Duration> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("retry_after")?
        .as_f64()
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl BackendExecutor for HttpBackend {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatCompletionRequest {
            model: self.model.as_deref().unwrap_or(DEFAULT_MODEL),
            messages,
            temperature: self.temperature,
        };

        let mut http_request = self.client.post(self.chat_completion_url()).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let timeout = request.timeout.unwrap_or(self.timeout);
        tracing::debug!(backend = %self.name, prompt_len = request.prompt.len(), "Sending completion request");

        let response = match tokio::time::timeout(timeout, http_request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(BackendError::timeout(start.elapsed())),
            Ok(Err(e)) if e.is_connect() => {
                return Err(BackendError::network(format!("connection failed: {}", e)));
            }
            Ok(Err(e)) => return Err(BackendError::network(format!("request failed: {}", e))),
            Err(_) => return Err(BackendError::timeout(start.elapsed())),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.map_http_error(status, &body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::parse(format!("failed to parse response: {}", e)))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let mut backend_response = BackendResponse::new(text, self.name.clone(), start.elapsed());
        if let Some(model) = completion.model {
            backend_response = backend_response.with_model(model);
        }
        if let Some(usage) = completion.usage {
            backend_response = backend_response.with_usage(TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        Ok(backend_response)
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        match tokio::time::timeout(Duration::from_secs(5), request.send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_backend_builder() {
        let backend = HttpBackend::new("openai", "https://api.openai.com/v1")
            .unwrap()
            .with_api_key("sk-test")
            .with_model("gpt-4o")
            .with_timeout(Duration::from_secs(60));

        assert_eq!(backend.name, "openai");
        assert_eq!(backend.api_key.as_deref(), Some("sk-test"));
        assert_eq!(backend.model.as_deref(), Some("gpt-4o"));
        assert_eq!(backend.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_chat_completion_url() {
        let backend = HttpBackend::new("test", "https://api.example.com/v1/").unwrap();
        assert_eq!(
            backend.chat_completion_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_map_http_error() {
        let backend = HttpBackend::new("test", "https://example.com").unwrap();

        let err = backend.map_http_error(reqwest::StatusCode::UNAUTHORIZED, "bad token");
        assert!(matches!(err, BackendError::Auth { .. }));

        let err = backend.map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"retry_after": 2}"#,
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = backend.map_http_error(reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(err.is_retryable());

        let err = backend.map_http_error(reqwest::StatusCode::NOT_FOUND, "no such model");
        assert!(matches!(err, BackendError::Config { .. }));
    }

    #[test]
    fn test_from_config() {
        let config = BackendConfig {
            command: "http://localhost:11434/v1".into(),
            model: Some("qwen3".into()),
            temperature: Some(0.1),
            timeout: 45,
            ..Default::default()
        };

        let backend = HttpBackend::from_config("ollama", &config).unwrap();
        assert_eq!(backend.name, "ollama");
        assert_eq!(backend.base_url, "http://localhost:11434/v1");
        assert_eq!(backend.model.as_deref(), Some("qwen3"));
        assert_eq!(backend.temperature, Some(0.1));
        assert_eq!(backend.timeout, Duration::from_secs(45));
        assert!(backend.api_key.is_none());
    }
}
