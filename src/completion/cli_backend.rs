//! Backend that shells out to a local LLM command

use super::types::{BackendError, BackendExecutor, BackendRequest, BackendResponse};
use crate::config::BackendConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Runs `command [args..] <prompt>` and takes stdout as the answer
#[derive(Debug, Clone)]
pub struct CliBackend {
    name: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl CliBackend {
    pub fn from_config(name: impl Into<String>, config: &BackendConfig) -> Self {
        Self {
            name: name.into(),
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout),
            env: config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
            env: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The system prompt, when present, is prepended to the user prompt
    fn build_command(&self, request: &BackendRequest) -> Command {
        let prompt = match &request.system_prompt {
            Some(system) => format!("{}\n\n{}", system, request.prompt),
            None => request.prompt.clone(),
        };

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BackendExecutor for CliBackend {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let start = Instant::now();
        let timeout = request.timeout.unwrap_or(self.timeout);

        tracing::debug!(
            backend = %self.name,
            command = %self.command,
            prompt_len = request.prompt.len(),
            "Spawning completion command"
        );

        let child = self.build_command(request).spawn().map_err(|e| {
            BackendError::unavailable(format!("failed to spawn '{}': {}", self.command, e))
        })?;

        // Dropping the future on timeout kills the child
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BackendError::unavailable(format!(
                    "failed to wait for '{}': {}",
                    self.command, e
                )));
            }
            Err(_) => return Err(BackendError::timeout(start.elapsed())),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(backend = %self.name, code = ?output.status.code(), "Completion command failed");
            return Err(BackendError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr,
            });
        }

        Ok(BackendResponse::new(stdout, self.name.clone(), start.elapsed()))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        Command::new("which")
            .arg(&self.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cli_backend_echo() {
        let backend = CliBackend::new("echo", "echo");
        let response = backend
            .execute(&BackendRequest::new("Hello, World!"))
            .await
            .unwrap();
        assert_eq!(response.text, "Hello, World!");
        assert_eq!(response.backend, "echo");
    }

    #[tokio::test]
    async fn test_system_prompt_is_prepended() {
        let backend = CliBackend::new("echo", "echo");
        let request = BackendRequest::new("the diff").with_system_prompt("You review commits");
        let response = backend.execute(&request).await.unwrap();
        assert!(response.text.starts_with("You review commits"));
        assert!(response.text.ends_with("the diff"));
    }

    #[tokio::test]
    async fn test_cli_backend_timeout() {
        let backend = CliBackend::new("sleep", "sleep").with_timeout(Duration::from_millis(100));
        let result = backend.execute(&BackendRequest::new("10")).await;
        assert!(matches!(result, Err(BackendError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cli_backend_failure() {
        let backend = CliBackend::new("false", "false");
        let result = backend.execute(&BackendRequest::new("")).await;
        assert!(matches!(result, Err(BackendError::ExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn test_cli_backend_unavailable() {
        let backend = CliBackend::new("missing", "definitely_not_a_real_command_12345");
        let result = backend.execute(&BackendRequest::new("test")).await;
        assert!(matches!(result, Err(BackendError::Unavailable { .. })));
        assert!(!backend.is_available().await);
    }

    #[test]
    fn test_from_config() {
        let mut config = BackendConfig {
            command: "claude".into(),
            args: vec!["-p".into()],
            timeout: 60,
            ..Default::default()
        };
        config.env.insert("NO_COLOR".into(), "1".into());

        let backend = CliBackend::from_config("claude", &config);
        assert_eq!(backend.command, "claude");
        assert_eq!(backend.args, vec!["-p"]);
        assert_eq!(backend.timeout, Duration::from_secs(60));
        assert_eq!(backend.env, vec![("NO_COLOR".to_string(), "1".to_string())]);
    }
}
